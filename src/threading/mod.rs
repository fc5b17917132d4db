//! Message header utilities.
//!
//! Normalizes the identifiers the matcher keys on: RFC 5322 message-ids and
//! reference chains, reply/forward subject markers, and participant addresses.

pub mod address;
pub mod headers;
pub mod subject;

pub use address::{address_domain, normalize_email, normalize_identifier, normalize_phone};
pub use headers::{
    header_value, normalize_message_id, parse_header_block, parse_references, strip_id_domain,
};
pub use subject::{has_reply_marker, is_forward_subject, strip_reply_prefixes, subject_key};
