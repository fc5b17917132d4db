//! Inbound payload parsers.
//!
//! Every provider webhook is mapped into a single [`InboundEvent`] shape.
//! Parsing is a pure transform: no I/O, no clock reads beyond a fallback
//! `received_at` when the provider omits a timestamp.

pub mod email;
pub mod sms;
pub mod voice;

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::Channel;
use crate::error::ParseError;

/// Provider tag declared by the webhook route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Postmark,
    #[serde(rename = "sendgrid")]
    SendGrid,
    Resend,
    /// Raw RFC 822 message (SES/Mailgun "store raw" style forwarding).
    Mime,
    Twilio,
    Vonage,
    TwilioVoice,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postmark => "postmark",
            Self::SendGrid => "sendgrid",
            Self::Resend => "resend",
            Self::Mime => "mime",
            Self::Twilio => "twilio",
            Self::Vonage => "vonage",
            Self::TwilioVoice => "twilio_voice",
        }
    }

    /// Channel this provider delivers.
    pub fn channel(&self) -> Channel {
        match self {
            Self::Postmark | Self::SendGrid | Self::Resend | Self::Mime => Channel::Email,
            Self::Twilio | Self::Vonage => Channel::Sms,
            Self::TwilioVoice => Channel::Voice,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postmark" => Ok(Self::Postmark),
            "sendgrid" => Ok(Self::SendGrid),
            "resend" => Ok(Self::Resend),
            "mime" | "raw" => Ok(Self::Mime),
            "twilio" | "twilio_sms" => Ok(Self::Twilio),
            "vonage" | "nexmo" => Ok(Self::Vonage),
            "twilio_voice" => Ok(Self::TwilioVoice),
            _ => Err(ParseError::UnsupportedProvider {
                provider: s.to_string(),
            }),
        }
    }
}

/// Protocol-level threading identifiers, all normalized (no `<` `>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingHeaders {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    /// Oldest first, as carried by the `References` header.
    pub references: Vec<String>,
}

impl ThreadingHeaders {
    /// Root of the thread: first reference, else the parent, else ourselves.
    pub fn thread_root(&self) -> Option<&str> {
        self.references
            .first()
            .or(self.in_reply_to.as_ref())
            .or(self.message_id.as_ref())
            .map(String::as_str)
    }
}

/// Attachment metadata (contents are never carried through the core).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

/// Voice call details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDetails {
    pub call_sid: String,
    pub caller_name: Option<String>,
    pub from_country: Option<String>,
    pub to_country: Option<String>,
    pub status: Option<String>,
}

/// Normalized inbound event from any channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Channel-native id (message-id, message SID, call SID).
    pub id: String,
    pub channel: Channel,
    pub provider: ProviderKind,
    /// Normalized sender identifier.
    pub from: String,
    pub from_name: Option<String>,
    /// Normalized recipients, at least one when the provider reports any.
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub threading: ThreadingHeaders,
    /// Raw protocol headers in arrival order (email only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<CallDetails>,
    pub raw_provider_payload: serde_json::Value,
}

impl InboundEvent {
    /// Body with quoted history removed, for keyword detection.
    pub fn latest_text(&self) -> String {
        match self.channel {
            Channel::Email => email::strip_quoted_text(&self.body),
            Channel::Sms | Channel::Voice => self.body.trim().to_string(),
        }
    }

    /// First recipient, the address the sender wrote to.
    pub fn primary_recipient(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }
}

/// Parse a raw provider payload into an [`InboundEvent`].
pub fn parse(raw: &serde_json::Value, provider: &str) -> Result<InboundEvent, ParseError> {
    let kind: ProviderKind = provider.parse()?;
    parse_as(raw, kind)
}

/// Parse with an already-resolved provider kind.
pub fn parse_as(raw: &serde_json::Value, kind: ProviderKind) -> Result<InboundEvent, ParseError> {
    match kind {
        ProviderKind::Postmark => email::parse_postmark(raw),
        ProviderKind::SendGrid => email::parse_sendgrid(raw),
        ProviderKind::Resend => email::parse_resend(raw),
        ProviderKind::Mime => email::parse_mime_payload(raw),
        ProviderKind::Twilio => sms::parse_twilio(raw),
        ProviderKind::Vonage => sms::parse_vonage(raw),
        ProviderKind::TwilioVoice => voice::parse_twilio_voice(raw),
    }
}

// ── Field helpers ───────────────────────────────────────────────────

/// Non-empty string field. Numbers are rendered so form-decoded and JSON
/// payloads read the same.
pub(crate) fn str_field<'a>(raw: &'a serde_json::Value, key: &str) -> Option<Cow<'a, str>> {
    match raw.get(key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(Cow::Borrowed(s)),
        serde_json::Value::Number(n) => Some(Cow::Owned(n.to_string())),
        _ => None,
    }
}

pub(crate) fn require_field<'a>(
    raw: &'a serde_json::Value,
    key: &str,
    provider: ProviderKind,
) -> Result<Cow<'a, str>, ParseError> {
    str_field(raw, key).ok_or_else(|| ParseError::MissingField {
        provider: provider.to_string(),
        field: key.to_string(),
    })
}

/// Parse an RFC 2822 or RFC 3339 timestamp, falling back to now.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Utc::now();
    };
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    Utc::now()
}
