//! Participant identifier normalization.

use crate::channels::Channel;

/// Normalize an email address: drops a display name (`"Alice <a@x.com>"`),
/// trims and lowercases.
pub fn normalize_email(raw: &str) -> String {
    let raw = raw.trim();
    let addr = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    addr.trim().trim_matches('"').to_lowercase()
}

/// Normalize a phone number to `+` and digits. Channel prefixes such as
/// `whatsapp:` or `tel:` are dropped.
pub fn normalize_phone(raw: &str) -> String {
    let raw = raw.trim();
    let number = raw.rsplit_once(':').map_or(raw, |(_, n)| n);
    let mut out = String::with_capacity(number.len());
    for (i, c) in number.trim().chars().enumerate() {
        if c.is_ascii_digit() || (c == '+' && i == 0) {
            out.push(c);
        }
    }
    out
}

/// Normalize a participant identifier for the given channel.
pub fn normalize_identifier(channel: Channel, raw: &str) -> String {
    match channel {
        Channel::Email => normalize_email(raw),
        Channel::Sms | Channel::Voice => normalize_phone(raw),
    }
}

/// Lowercased domain of an email address.
pub fn address_domain(address: &str) -> Option<String> {
    let normalized = normalize_email(address);
    let (_, domain) = normalized.rsplit_once('@')?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}
