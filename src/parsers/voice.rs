//! Voice webhook parser (Twilio call status / gather callbacks).

use serde_json::Value;

use super::sms::phone;
use super::{
    CallDetails, InboundEvent, ProviderKind, ThreadingHeaders, parse_timestamp, require_field,
    str_field,
};
use crate::channels::Channel;
use crate::error::ParseError;
use crate::threading::normalize_phone;

/// Twilio voice webhook. The call SID doubles as the event id; speech or
/// transcription text, when present, becomes the body.
pub fn parse_twilio_voice(raw: &Value) -> Result<InboundEvent, ParseError> {
    let kind = ProviderKind::TwilioVoice;
    let call_sid = require_field(raw, "CallSid", kind)?.into_owned();
    let from = phone(
        &str_field(raw, "Caller")
            .or_else(|| str_field(raw, "From"))
            .ok_or_else(|| ParseError::MissingField {
                provider: kind.to_string(),
                field: "From".into(),
            })?,
        kind,
    )?;
    let to = str_field(raw, "To")
        .or_else(|| str_field(raw, "Called"))
        .map(|t| normalize_phone(&t))
        .into_iter()
        .collect();

    let body = str_field(raw, "SpeechResult")
        .or_else(|| str_field(raw, "TranscriptionText"))
        .map(|b| b.into_owned())
        .unwrap_or_default();

    let call = CallDetails {
        call_sid: call_sid.clone(),
        caller_name: str_field(raw, "CallerName").map(|s| s.into_owned()),
        from_country: str_field(raw, "FromCountry")
            .or_else(|| str_field(raw, "CallerCountry"))
            .map(|s| s.into_owned()),
        to_country: str_field(raw, "ToCountry")
            .or_else(|| str_field(raw, "CalledCountry"))
            .map(|s| s.into_owned()),
        status: str_field(raw, "CallStatus").map(|s| s.into_owned()),
    };

    Ok(InboundEvent {
        id: call_sid.clone(),
        channel: Channel::Voice,
        provider: kind,
        from,
        from_name: call.caller_name.clone(),
        to,
        cc: Vec::new(),
        subject: None,
        body,
        received_at: parse_timestamp(str_field(raw, "Timestamp").as_deref()),
        threading: ThreadingHeaders {
            message_id: Some(call_sid),
            ..Default::default()
        },
        headers: Vec::new(),
        attachments: Vec::new(),
        media_urls: Vec::new(),
        call: Some(call),
        raw_provider_payload: raw.clone(),
    })
}
