//! SMS webhook parsers: Twilio messaging and Vonage inbound SMS.

use serde_json::Value;

use super::{InboundEvent, ProviderKind, ThreadingHeaders, parse_timestamp, require_field, str_field};
use crate::channels::Channel;
use crate::error::ParseError;
use crate::threading::normalize_phone;

/// Twilio messaging webhook (form fields decoded into a JSON object).
pub fn parse_twilio(raw: &Value) -> Result<InboundEvent, ParseError> {
    let kind = ProviderKind::Twilio;
    let from = phone(&require_field(raw, "From", kind)?, kind)?;
    let to = str_field(raw, "To").map(|t| normalize_phone(&t)).into_iter().collect();

    let sid = str_field(raw, "MessageSid")
        .or_else(|| str_field(raw, "SmsMessageSid"))
        .or_else(|| str_field(raw, "SmsSid"))
        .ok_or_else(|| ParseError::MissingField {
            provider: kind.to_string(),
            field: "MessageSid".into(),
        })?
        .into_owned();

    let num_media = str_field(raw, "NumMedia")
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);
    let media_urls = (0..num_media)
        .filter_map(|i| str_field(raw, &format!("MediaUrl{i}")).map(|u| u.into_owned()))
        .collect();

    Ok(InboundEvent {
        id: sid.clone(),
        channel: Channel::Sms,
        provider: kind,
        from,
        from_name: None,
        to,
        cc: Vec::new(),
        subject: None,
        body: str_field(raw, "Body").map(|b| b.into_owned()).unwrap_or_default(),
        received_at: parse_timestamp(None),
        threading: ThreadingHeaders {
            message_id: Some(sid),
            ..Default::default()
        },
        headers: Vec::new(),
        attachments: Vec::new(),
        media_urls,
        call: None,
        raw_provider_payload: raw.clone(),
    })
}

/// Vonage (Nexmo) inbound SMS webhook.
pub fn parse_vonage(raw: &Value) -> Result<InboundEvent, ParseError> {
    let kind = ProviderKind::Vonage;
    let from = phone(&require_field(raw, "msisdn", kind)?, kind)?;
    let to = str_field(raw, "to").map(|t| normalize_phone(&t)).into_iter().collect();
    let id = require_field(raw, "messageId", kind)?.into_owned();

    Ok(InboundEvent {
        id: id.clone(),
        channel: Channel::Sms,
        provider: kind,
        from,
        from_name: None,
        to,
        cc: Vec::new(),
        subject: None,
        body: str_field(raw, "text").map(|b| b.into_owned()).unwrap_or_default(),
        received_at: parse_timestamp(str_field(raw, "message-timestamp").as_deref()),
        threading: ThreadingHeaders {
            message_id: Some(id),
            ..Default::default()
        },
        headers: Vec::new(),
        attachments: Vec::new(),
        media_urls: Vec::new(),
        call: None,
        raw_provider_payload: raw.clone(),
    })
}

pub(super) fn phone(raw: &str, kind: ProviderKind) -> Result<String, ParseError> {
    let number = normalize_phone(raw);
    if number.trim_start_matches('+').is_empty() {
        return Err(ParseError::InvalidPayload {
            provider: kind.to_string(),
            reason: format!("not a phone number: {raw}"),
        });
    }
    Ok(number)
}
