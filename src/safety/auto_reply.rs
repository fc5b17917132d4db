//! Machine-generated mail detection and opt-out/opt-in keywords.
//!
//! Rules are regexes keyed on one field of the inbound event. Header rules
//! match a named header's value; an `Auto-Submitted: no` header is an
//! explicit human marker and never counts as a positive signal.

use regex::Regex;
use tracing::debug;

use crate::channels::Channel;
use crate::parsers::InboundEvent;
use crate::threading::header_value;

/// Which event field a rule matches against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleField {
    Sender,
    Subject,
    Header(String),
}

/// A single detection rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct AutoReplyRule {
    pub regex: Regex,
    pub field: RuleField,
    /// Why this rule triggers.
    pub reason: String,
}

/// Detector for auto-replies, bounces and bulk mail.
pub struct AutoReplyDetector {
    rules: Vec<AutoReplyRule>,
}

/// STOP / START style control keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKeyword {
    Stop,
    Start,
}

const STOP_WORDS: &[&str] = &["STOP", "STOPALL", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];
const START_WORDS: &[&str] = &["START", "UNSTOP", "SUBSCRIBE"];

/// Detect a control keyword: the first non-empty line of the latest text,
/// stripped of surrounding punctuation, equals one of the keywords
/// (case-insensitive).
pub fn detect_keyword(latest_text: &str) -> Option<ControlKeyword> {
    let line = latest_text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let word = line
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_uppercase();
    if STOP_WORDS.contains(&word.as_str()) {
        Some(ControlKeyword::Stop)
    } else if START_WORDS.contains(&word.as_str()) {
        Some(ControlKeyword::Start)
    } else {
        None
    }
}

fn rule(pattern: &str, field: RuleField, reason: &str) -> AutoReplyRule {
    AutoReplyRule {
        regex: Regex::new(pattern).expect("built-in auto-reply pattern"),
        field,
        reason: reason.into(),
    }
}

fn header(name: &str) -> RuleField {
    RuleField::Header(name.into())
}

impl AutoReplyDetector {
    /// Detector with the standard header, sender and subject rules.
    pub fn default_rules() -> Self {
        let rules = vec![
            // RFC 3834
            rule(r"(?i)^\s*auto-", header("Auto-Submitted"), "Auto-Submitted header"),
            rule(r"", header("X-Autoreply"), "X-Autoreply header"),
            rule(r"", header("X-Autorespond"), "X-Autorespond header"),
            rule(r"", header("X-Auto-Response-Suppress"), "X-Auto-Response-Suppress header"),
            rule(r"", header("X-Failed-Recipients"), "bounce (X-Failed-Recipients)"),
            rule(
                r"(?i)^\s*(bulk|junk|list|auto_reply)\s*$",
                header("Precedence"),
                "bulk precedence",
            ),
            // Null return path marks bounces and notifications.
            rule(r"^\s*<\s*>\s*$|^\s*$", header("Return-Path"), "empty Return-Path"),
            rule(
                r"(?i)^(mailer[\-_]?daemon|postmaster)@",
                RuleField::Sender,
                "automated mail system",
            ),
            rule(
                r"(?i)^(no[\-_.]?reply|do[\-_.]?not[\-_.]?reply)@",
                RuleField::Sender,
                "noreply sender",
            ),
            rule(
                r"(?i)(out of (the )?office|automatic reply|auto[\- ]?reply|autoreply|away from (my|the) (office|desk)|on vacation|abwesenheitsnotiz)",
                RuleField::Subject,
                "out-of-office subject",
            ),
            rule(
                r"(?i)(undeliverable|undelivered|delivery status notification|delivery (has )?failed|delivery failure|returned mail|mail delivery (failed|subsystem))",
                RuleField::Subject,
                "delivery failure subject",
            ),
        ];
        Self { rules }
    }

    /// Create an empty detector (for testing).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a custom rule.
    pub fn add_rule(&mut self, pattern: &str, field: RuleField, reason: &str) -> Result<(), regex::Error> {
        self.rules.push(AutoReplyRule {
            regex: Regex::new(pattern)?,
            field,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Reason of the first matching rule, if the event looks machine
    /// generated.
    pub fn detect(&self, event: &InboundEvent) -> Option<&str> {
        for rule in &self.rules {
            let value = match &rule.field {
                RuleField::Sender => {
                    if event.channel != Channel::Email {
                        continue;
                    }
                    event.from.as_str()
                }
                RuleField::Subject => match event.subject.as_deref() {
                    Some(subject) => subject,
                    None => continue,
                },
                RuleField::Header(name) => match header_value(&event.headers, name) {
                    Some(value) => value,
                    None => continue,
                },
            };

            if rule.regex.is_match(value) {
                debug!(
                    sender = %event.from,
                    reason = %rule.reason,
                    "Auto-reply rule matched"
                );
                return Some(rule.reason.as_str());
            }
        }
        None
    }
}

impl Default for AutoReplyDetector {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{ProviderKind, ThreadingHeaders};
    use chrono::Utc;

    fn event(from: &str, subject: Option<&str>, headers: &[(&str, &str)]) -> InboundEvent {
        InboundEvent {
            id: "m1".into(),
            channel: Channel::Email,
            provider: ProviderKind::Postmark,
            from: from.into(),
            from_name: None,
            to: vec!["support@acme.io".into()],
            cc: vec![],
            subject: subject.map(String::from),
            body: "body".into(),
            received_at: Utc::now(),
            threading: ThreadingHeaders::default(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            attachments: vec![],
            media_urls: vec![],
            call: None,
            raw_provider_payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn auto_submitted_no_is_not_a_signal() {
        let detector = AutoReplyDetector::default_rules();
        let human = event("alice@x.com", Some("Question"), &[("Auto-Submitted", "no")]);
        assert!(detector.detect(&human).is_none());

        let machine = event("alice@x.com", Some("Question"), &[("auto-submitted", "auto-replied")]);
        assert_eq!(detector.detect(&machine), Some("Auto-Submitted header"));
    }

    #[test]
    fn header_presence_and_precedence() {
        let detector = AutoReplyDetector::default_rules();
        assert!(detector.detect(&event("a@x.com", None, &[("X-Autoreply", "yes")])).is_some());
        assert!(detector.detect(&event("a@x.com", None, &[("Precedence", "bulk")])).is_some());
        assert!(detector.detect(&event("a@x.com", None, &[("Precedence", "first-class")])).is_none());
        assert!(detector.detect(&event("a@x.com", None, &[("Return-Path", "<>")])).is_some());
        assert!(detector.detect(&event("a@x.com", None, &[("Return-Path", "<a@x.com>")])).is_none());
    }

    #[test]
    fn sender_and_subject_patterns() {
        let detector = AutoReplyDetector::default_rules();
        assert!(detector.detect(&event("MAILER-DAEMON@mx.example.com", None, &[])).is_some());
        assert!(detector.detect(&event("no-reply@shop.com", None, &[])).is_some());
        assert!(detector.detect(&event("a@x.com", Some("Out of Office: back Monday"), &[])).is_some());
        assert!(detector.detect(&event("a@x.com", Some("Automatic reply: Quote"), &[])).is_some());
        assert!(detector.detect(&event("a@x.com", Some("Undeliverable: Quote"), &[])).is_some());
        assert!(detector.detect(&event("a@x.com", Some("Re: Quote Request"), &[])).is_none());
    }

    #[test]
    fn sender_rules_skip_non_email() {
        let detector = AutoReplyDetector::default_rules();
        let mut sms = event("postmaster@x.com", None, &[]);
        sms.channel = Channel::Sms;
        assert!(detector.detect(&sms).is_none());
    }

    #[test]
    fn empty_detector_never_matches() {
        let detector = AutoReplyDetector::empty();
        assert!(detector.detect(&event("noreply@x.com", Some("Out of office"), &[])).is_none());
    }

    #[test]
    fn keywords_on_first_line() {
        assert_eq!(detect_keyword("STOP"), Some(ControlKeyword::Stop));
        assert_eq!(detect_keyword("  stop.\n"), Some(ControlKeyword::Stop));
        assert_eq!(detect_keyword("Unsubscribe\nthanks"), Some(ControlKeyword::Stop));
        assert_eq!(detect_keyword("\n\nSTART"), Some(ControlKeyword::Start));
        assert_eq!(detect_keyword("Please don't stop sending"), None);
        assert_eq!(detect_keyword(""), None);
    }

    #[test]
    fn plain_yes_is_not_an_opt_in() {
        assert_eq!(detect_keyword("Yes"), None);
        assert_eq!(detect_keyword("yes!
see you at 7"), None);
        assert_eq!(detect_keyword("unstop"), Some(ControlKeyword::Start));
    }
}
