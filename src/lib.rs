//! Switchboard: multichannel conversation gateway.
//!
//! Inbound email, SMS and voice webhooks are normalized, threaded into
//! conversations, screened by the loop guard and answered through
//! prioritized outbound providers.

pub mod channels;
pub mod config;
pub mod error;
pub mod matcher;
pub mod parsers;
pub mod pipeline;
pub mod router;
pub mod safety;
pub mod store;
pub mod threading;
pub mod tools;
pub mod webhook;
