//! Email webhook parsers: Postmark, SendGrid Inbound Parse, Resend and raw
//! RFC 822 messages.
//!
//! Providers summarise threading in their own fields (Postmark's `MessageID`
//! is an internal GUID, Resend's `message_id` may be re-encoded). Whenever the
//! raw protocol headers are available they win: only those match what the
//! correspondent's mail client used for threading.

use mail_parser::{MessageParser, MimeHeaders};
use serde_json::Value;
use uuid::Uuid;

use super::{
    Attachment, InboundEvent, ProviderKind, ThreadingHeaders, parse_timestamp, require_field,
    str_field,
};
use crate::channels::Channel;
use crate::error::ParseError;
use crate::threading::{
    header_value, normalize_email, normalize_message_id, parse_header_block, parse_references,
};

/// Fields collected from a provider payload before normalization.
#[derive(Default)]
struct EmailParts {
    from: String,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    date: Option<String>,
    headers: Vec<(String, String)>,
    summary: ThreadingHeaders,
    attachments: Vec<Attachment>,
    provider_id: Option<String>,
}

// ── Providers ───────────────────────────────────────────────────────

/// Postmark inbound webhook (JSON).
pub fn parse_postmark(raw: &Value) -> Result<InboundEvent, ParseError> {
    let kind = ProviderKind::Postmark;

    let from = raw
        .get("FromFull")
        .and_then(|f| f.get("Email"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .map_or_else(|| require_field(raw, "From", kind).map(|s| s.into_owned()), Ok)?;

    let to = first_addresses(raw, &["ToFull", "To"]);
    let cc = first_addresses(raw, &["CcFull", "Cc"]);

    let attachments = raw
        .get("Attachments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|a| {
                    Some(Attachment {
                        name: a.get("Name")?.as_str()?.to_string(),
                        content_type: a.get("ContentType").and_then(Value::as_str).map(String::from),
                        size: a.get("ContentLength").and_then(Value::as_u64),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let parts = EmailParts {
        from,
        to,
        cc,
        subject: str_field(raw, "Subject").map(|s| s.into_owned()),
        text: str_field(raw, "TextBody").map(|s| s.into_owned()),
        html: str_field(raw, "HtmlBody").map(|s| s.into_owned()),
        date: str_field(raw, "Date").map(|s| s.into_owned()),
        headers: name_value_headers(raw.get("Headers")),
        summary: ThreadingHeaders {
            message_id: str_field(raw, "MessageID").map(|s| s.into_owned()),
            ..Default::default()
        },
        attachments,
        provider_id: str_field(raw, "MessageID").map(|s| s.into_owned()),
    };

    build_event(kind, parts, raw)
}

/// SendGrid Inbound Parse (multipart form decoded into string fields).
///
/// When the route is configured to post the full MIME message (`email`
/// field) that is parsed directly.
pub fn parse_sendgrid(raw: &Value) -> Result<InboundEvent, ParseError> {
    let kind = ProviderKind::SendGrid;

    if let Some(mime) = str_field(raw, "email") {
        return parse_mime(&mime, kind, raw);
    }

    let from = require_field(raw, "from", kind)?.into_owned();
    let headers = str_field(raw, "headers")
        .map(|h| parse_header_block(&h))
        .unwrap_or_default();

    let attachments = str_field(raw, "attachment-info")
        .and_then(|info| serde_json::from_str::<Value>(&info).ok())
        .and_then(|info| {
            info.as_object().map(|map| {
                map.values()
                    .filter_map(|a| {
                        let name = a
                            .get("filename")
                            .or_else(|| a.get("name"))
                            .and_then(Value::as_str)?;
                        Some(Attachment {
                            name: name.to_string(),
                            content_type: a.get("type").and_then(Value::as_str).map(String::from),
                            size: None,
                        })
                    })
                    .collect()
            })
        })
        .unwrap_or_default();

    let date = header_value(&headers, "Date").map(String::from);

    let parts = EmailParts {
        from,
        to: first_addresses(raw, &["to"]),
        cc: first_addresses(raw, &["cc"]),
        subject: str_field(raw, "subject").map(|s| s.into_owned()),
        text: str_field(raw, "text").map(|s| s.into_owned()),
        html: str_field(raw, "html").map(|s| s.into_owned()),
        date,
        headers,
        summary: ThreadingHeaders::default(),
        attachments,
        provider_id: None,
    };

    build_event(kind, parts, raw)
}

/// Resend `email.received` webhook. Fields live under `data`; a bare data
/// object is accepted too.
pub fn parse_resend(raw: &Value) -> Result<InboundEvent, ParseError> {
    let kind = ProviderKind::Resend;
    let data = raw.get("data").filter(|d| d.is_object()).unwrap_or(raw);

    let from = require_field(data, "from", kind)?.into_owned();

    let attachments = data
        .get("attachments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|a| {
                    Some(Attachment {
                        name: a.get("filename")?.as_str()?.to_string(),
                        content_type: a.get("content_type").and_then(Value::as_str).map(String::from),
                        size: a.get("size").and_then(Value::as_u64),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let summary = ThreadingHeaders {
        message_id: str_field(data, "message_id").map(|s| s.into_owned()),
        in_reply_to: str_field(data, "in_reply_to").map(|s| s.into_owned()),
        references: data
            .get("references")
            .map(id_list_from_value)
            .unwrap_or_default(),
    };

    let parts = EmailParts {
        from,
        to: first_addresses(data, &["to"]),
        cc: first_addresses(data, &["cc"]),
        subject: str_field(data, "subject").map(|s| s.into_owned()),
        text: str_field(data, "text").map(|s| s.into_owned()),
        html: str_field(data, "html").map(|s| s.into_owned()),
        date: str_field(data, "created_at")
            .or_else(|| str_field(raw, "created_at"))
            .map(|s| s.into_owned()),
        headers: name_value_headers(data.get("headers")),
        summary,
        attachments,
        provider_id: str_field(data, "email_id").map(|s| s.into_owned()),
    };

    build_event(kind, parts, raw)
}

/// Raw RFC 822 message, posted as `{"raw": "..."}` or a bare JSON string.
pub fn parse_mime_payload(raw: &Value) -> Result<InboundEvent, ParseError> {
    let kind = ProviderKind::Mime;
    let text = raw
        .as_str()
        .map(std::borrow::Cow::Borrowed)
        .or_else(|| str_field(raw, "raw"))
        .or_else(|| str_field(raw, "email"))
        .ok_or_else(|| ParseError::MissingField {
            provider: kind.to_string(),
            field: "raw".into(),
        })?;
    parse_mime(&text, kind, raw)
}

/// Parse a full MIME message with mail-parser.
fn parse_mime(text: &str, kind: ProviderKind, raw: &Value) -> Result<InboundEvent, ParseError> {
    let parsed = MessageParser::default()
        .parse(text.as_bytes())
        .ok_or_else(|| ParseError::InvalidPayload {
            provider: kind.to_string(),
            reason: "unparseable MIME message".into(),
        })?;

    let from = extract_sender(&parsed).ok_or_else(|| ParseError::MissingField {
        provider: kind.to_string(),
        field: "From".into(),
    })?;

    let attachments = parsed
        .attachments()
        .map(|part| {
            let part: &mail_parser::MessagePart = part;
            Attachment {
                name: MimeHeaders::attachment_name(part).unwrap_or("file").to_string(),
                content_type: MimeHeaders::content_type(part).map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                }),
                size: Some(part.contents().len() as u64),
            }
        })
        .collect();

    let parts = EmailParts {
        from,
        to: extract_addresses(parsed.to()),
        cc: extract_addresses(parsed.cc()),
        subject: parsed.subject().map(String::from),
        text: parsed.body_text(0).map(|t| t.to_string()),
        html: parsed.body_html(0).map(|h| h.to_string()),
        date: parsed.date().map(|d| d.to_rfc3339()),
        headers: parse_header_block(text),
        summary: ThreadingHeaders {
            message_id: parsed.message_id().map(String::from),
            ..Default::default()
        },
        attachments,
        provider_id: None,
    };

    build_event(kind, parts, raw)
}

// ── Normalization ───────────────────────────────────────────────────

fn build_event(kind: ProviderKind, parts: EmailParts, raw: &Value) -> Result<InboundEvent, ParseError> {
    let from = normalize_email(&parts.from);
    if !from.contains('@') {
        return Err(ParseError::InvalidPayload {
            provider: kind.to_string(),
            reason: format!("sender is not an email address: {}", parts.from),
        });
    }

    let threading = reconcile_threading(&parts.headers, parts.summary);
    let id = threading
        .message_id
        .clone()
        .or(parts.provider_id)
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    let body = match (parts.text, parts.html) {
        (Some(text), _) if !text.trim().is_empty() => text,
        (_, Some(html)) => strip_html(&html),
        _ => String::new(),
    };

    Ok(InboundEvent {
        id,
        channel: Channel::Email,
        provider: kind,
        from,
        from_name: display_name(&parts.from),
        to: parts.to,
        cc: parts.cc,
        subject: parts.subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        body,
        received_at: parse_timestamp(parts.date.as_deref()),
        threading,
        headers: parts.headers,
        attachments: parts.attachments,
        media_urls: Vec::new(),
        call: None,
        raw_provider_payload: raw.clone(),
    })
}

/// Merge protocol headers with a provider's summary fields. Header values
/// take precedence field by field.
pub fn reconcile_threading(headers: &[(String, String)], summary: ThreadingHeaders) -> ThreadingHeaders {
    let message_id = header_value(headers, "Message-ID")
        .map(normalize_message_id)
        .filter(|id| !id.is_empty())
        .or_else(|| {
            summary
                .message_id
                .as_deref()
                .map(normalize_message_id)
                .filter(|id| !id.is_empty())
        });

    let in_reply_to = header_value(headers, "In-Reply-To")
        .and_then(|v| parse_references(v).into_iter().next())
        .or_else(|| {
            summary
                .in_reply_to
                .as_deref()
                .and_then(|v| parse_references(v).into_iter().next())
        });

    let header_refs = header_value(headers, "References")
        .map(parse_references)
        .unwrap_or_default();
    let references = if header_refs.is_empty() {
        summary
            .references
            .iter()
            .map(|r| normalize_message_id(r))
            .filter(|r| !r.is_empty())
            .collect()
    } else {
        header_refs
    };

    ThreadingHeaders {
        message_id,
        in_reply_to,
        references,
    }
}

/// `[{"Name": .., "Value": ..}]`, `[{"name": .., "value": ..}]` or a
/// `{"Name": "Value"}` object.
fn name_value_headers(value: Option<&Value>) -> Vec<(String, String)> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|h| {
                let name = h.get("Name").or_else(|| h.get("name"))?.as_str()?;
                let value = h.get("Value").or_else(|| h.get("value"))?.as_str()?;
                Some((name.to_string(), value.to_string()))
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

/// Addresses from the first present key among `keys`.
fn first_addresses(raw: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .map(addresses_from_value)
        .find(|list| !list.is_empty())
        .unwrap_or_default()
}

/// Normalized addresses from a comma list, an array of strings, or an array
/// of `{Email}` / `{email}` objects.
fn addresses_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => split_address_list(s),
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(s) => split_address_list(s),
                Value::Object(_) => item
                    .get("Email")
                    .or_else(|| item.get("email"))
                    .or_else(|| item.get("address"))
                    .and_then(Value::as_str)
                    .map(|s| vec![normalize_email(s)])
                    .unwrap_or_default(),
                _ => Vec::new(),
            })
            .filter(|a| a.contains('@'))
            .collect(),
        _ => Vec::new(),
    }
}

fn id_list_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => parse_references(s),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(parse_references)
            .collect(),
        _ => Vec::new(),
    }
}

/// Split `"A <a@x.com>, \"Smith, B\" <b@x.com>"` on separators outside
/// quotes and angle brackets.
fn split_address_list(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in raw.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' | ';' if !in_quotes && !in_angle => {
                out.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    out.push(current);

    out.iter()
        .map(|s| normalize_email(s))
        .filter(|s| s.contains('@'))
        .collect()
}

/// Display name part of `"Alice Smith" <alice@x.com>`.
fn display_name(raw: &str) -> Option<String> {
    let (name, _) = raw.split_once('<')?;
    let name = name.trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// ── Body helpers ────────────────────────────────────────────────────

/// Strip quoted text from an email body.
///
/// Removes lines starting with `>`, and everything after an
/// "On ... wrote:" attribution or an "Original Message" separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }
        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n").trim_start().to_string()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract email addresses from an optional mail_parser Address field.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| normalize_email(s)))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| normalize_email(s)))
            })
            .collect(),
    }
}

/// Sender address of a parsed message, display name included when present.
fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    let addr = parsed.from().and_then(|a| a.first())?;
    let email = addr.address()?;
    Some(match addr.name() {
        Some(name) => format!("{name} <{email}>"),
        None => email.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn postmark_payload() -> Value {
        json!({
            "From": "alice@customer.com",
            "FromName": "Alice",
            "FromFull": {"Email": "Alice@Customer.com", "Name": "Alice"},
            "To": "support@acme.io",
            "ToFull": [{"Email": "support@acme.io", "Name": ""}],
            "Cc": "",
            "Subject": "Re: Quote Request",
            "MessageID": "b7bc2f4a-e38e-4336-af7d-e6c392c2f817",
            "Date": "Sat, 5 Apr 2025 16:59:01 +0200",
            "TextBody": "Sounds good.\n\nOn Mon, Alice wrote:\n> old",
            "HtmlBody": "<p>Sounds good.</p>",
            "Headers": [
                {"Name": "Message-ID", "Value": "<CAF=abc123@mail.gmail.com>"},
                {"Name": "In-Reply-To", "Value": "<orig-1@acme.io>"},
                {"Name": "References", "Value": "<root-0@acme.io> <orig-1@acme.io>"}
            ],
            "Attachments": [
                {"Name": "quote.pdf", "ContentType": "application/pdf", "ContentLength": 2048}
            ]
        })
    }

    #[test]
    fn postmark_header_message_id_beats_summary_field() {
        let event = parse_postmark(&postmark_payload()).unwrap();
        assert_eq!(event.id, "CAF=abc123@mail.gmail.com");
        assert_eq!(event.threading.message_id.as_deref(), Some("CAF=abc123@mail.gmail.com"));
        assert_eq!(event.threading.in_reply_to.as_deref(), Some("orig-1@acme.io"));
        assert_eq!(event.threading.references, vec!["root-0@acme.io", "orig-1@acme.io"]);
    }

    #[test]
    fn postmark_fields_normalized() {
        let event = parse_postmark(&postmark_payload()).unwrap();
        assert_eq!(event.channel, Channel::Email);
        assert_eq!(event.from, "alice@customer.com");
        assert_eq!(event.to, vec!["support@acme.io"]);
        assert!(event.cc.is_empty());
        assert_eq!(event.subject.as_deref(), Some("Re: Quote Request"));
        assert_eq!(event.attachments.len(), 1);
        assert_eq!(event.attachments[0].size, Some(2048));
        assert_eq!(event.received_at.to_rfc3339(), "2025-04-05T14:59:01+00:00");
        assert_eq!(event.latest_text(), "Sounds good.");
    }

    #[test]
    fn postmark_falls_back_to_summary_without_headers() {
        let mut payload = postmark_payload();
        payload["Headers"] = json!([]);
        let event = parse_postmark(&payload).unwrap();
        assert_eq!(event.id, "b7bc2f4a-e38e-4336-af7d-e6c392c2f817");
        assert!(event.threading.in_reply_to.is_none());
        assert!(event.threading.references.is_empty());
    }

    #[test]
    fn postmark_requires_sender() {
        let err = parse_postmark(&json!({"To": "support@acme.io"})).unwrap_err();
        assert!(matches!(err, ParseError::MissingField { field, .. } if field == "From"));
    }

    #[test]
    fn sendgrid_parses_raw_header_block() {
        let payload = json!({
            "from": "\"Smith, Bob\" <bob@customer.com>",
            "to": "Support <support@acme.io>, sales@acme.io",
            "subject": "Fwd: Invoice",
            "text": "",
            "html": "<div>See <b>below</b></div>",
            "headers": "Message-ID: <sg-1@customer.com>\r\nIn-Reply-To: <x@acme.io>\r\nReferences: <r1@acme.io>\r\n <x@acme.io>\r\nAuto-Submitted: no\r\n",
            "attachment-info": "{\"attachment1\": {\"filename\": \"a.txt\", \"type\": \"text/plain\"}}"
        });
        let event = parse_sendgrid(&payload).unwrap();
        assert_eq!(event.from, "bob@customer.com");
        assert_eq!(event.from_name.as_deref(), Some("Smith, Bob"));
        assert_eq!(event.to, vec!["support@acme.io", "sales@acme.io"]);
        assert_eq!(event.body, "See below");
        assert_eq!(event.threading.message_id.as_deref(), Some("sg-1@customer.com"));
        assert_eq!(event.threading.references, vec!["r1@acme.io", "x@acme.io"]);
        assert_eq!(event.attachments[0].name, "a.txt");
        assert_eq!(header_value(&event.headers, "auto-submitted"), Some("no"));
    }

    #[test]
    fn resend_prefers_header_over_summary() {
        let payload = json!({
            "type": "email.received",
            "created_at": "2025-06-01T12:00:00Z",
            "data": {
                "email_id": "re_123",
                "from": "Carol <carol@customer.com>",
                "to": ["support@acme.io"],
                "subject": "Question",
                "text": "Hi there",
                "message_id": "simplified-id",
                "headers": {"message-id": "<real-id@customer.com>"}
            }
        });
        let event = parse_resend(&payload).unwrap();
        assert_eq!(event.id, "real-id@customer.com");
        assert_eq!(event.from, "carol@customer.com");
        assert_eq!(event.received_at.to_rfc3339(), "2025-06-01T12:00:00+00:00");
    }

    #[test]
    fn mime_message_parsed_with_threading() {
        let raw = "From: Dana <dana@customer.com>\r\n\
To: support@acme.io\r\n\
Subject: Re: Order 42\r\n\
Message-ID: <m-2@customer.com>\r\n\
In-Reply-To: <m-1@acme.io>\r\n\
References: <m-0@acme.io> <m-1@acme.io>\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Thanks!\r\n";
        let event = parse_mime_payload(&json!({ "raw": raw })).unwrap();
        assert_eq!(event.provider, ProviderKind::Mime);
        assert_eq!(event.from, "dana@customer.com");
        assert_eq!(event.from_name.as_deref(), Some("Dana"));
        assert_eq!(event.to, vec!["support@acme.io"]);
        assert_eq!(event.threading.in_reply_to.as_deref(), Some("m-1@acme.io"));
        assert_eq!(event.threading.references, vec!["m-0@acme.io", "m-1@acme.io"]);
        assert_eq!(event.body.trim(), "Thanks!");
    }

    #[test]
    fn mime_payload_requires_raw_text() {
        let err = parse_mime_payload(&json!({"foo": 1})).unwrap_err();
        assert!(matches!(err, ParseError::MissingField { .. }));
    }

    #[test]
    fn strip_quoted_lines_and_attribution() {
        let body = "Sure thing\n\n> quoted\nEnd\n\nOn Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:\n> Original";
        assert_eq!(strip_quoted_text(body), "Sure thing\n\nEnd");
        assert_eq!(strip_quoted_text("My reply\n\n--- Original Message ---\nOld"), "My reply");
        assert_eq!(strip_quoted_text(""), "");
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<div><b>Bold</b> and <i>italic</i></div>"), "Bold and italic");
        assert_eq!(strip_html("<p>  Hello   World  </p>"), "Hello World");
    }

    #[test]
    fn address_list_respects_quotes() {
        let list = split_address_list("\"Doe, Jane\" <jane@x.com>; john@x.com, not-an-address");
        assert_eq!(list, vec!["jane@x.com", "john@x.com"]);
    }
}
