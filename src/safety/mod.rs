//! Loop and abuse guard.
//!
//! Decides whether an automated reply may be sent for an inbound event.
//! Checks run in a fixed order and the first failure short-circuits:
//!
//! 1. machine-generated mail, then STOP / START control keywords
//! 2. forwarded message from a sender with no history
//! 3. allow-list membership (first contact on a new conversation enrolls)
//! 4. per-conversation rate limit (checked here, spent when a send is made)
//!
//! A suppression is a normal outcome, not an error.

pub mod allowlist;
pub mod auto_reply;
pub mod rate_limit;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

pub use allowlist::Allowlist;
pub use auto_reply::{AutoReplyDetector, ControlKeyword, RuleField, detect_keyword};
pub use rate_limit::{RateLimiter, RateWindowState};

use crate::parsers::InboundEvent;
use crate::threading::is_forward_subject;

/// Why an automated reply was withheld.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SuppressReason {
    /// Machine-generated message (rule reason attached).
    AutoReply(String),
    /// Sender sent a STOP keyword.
    OptedOut,
    NotAllowlisted,
    RateLimited,
    ForwardedFromUnknown,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoReply(reason) => write!(f, "auto-reply ({reason})"),
            Self::OptedOut => f.write_str("opted out"),
            Self::NotAllowlisted => f.write_str("sender not on allow-list"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::ForwardedFromUnknown => f.write_str("forwarded from unknown sender"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDecision {
    Allow,
    Suppress(SuppressReason),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Conversation facts the guard cannot derive from the event alone.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub conversation_id: &'a str,
    /// The matcher found nothing and a conversation was just created.
    pub is_new_conversation: bool,
    /// The sender had stored entries before this event.
    pub has_prior_history: bool,
}

pub struct LoopGuard {
    detector: AutoReplyDetector,
    allowlist: Arc<Allowlist>,
    limiter: Arc<RateLimiter>,
}

impl LoopGuard {
    pub fn new(detector: AutoReplyDetector, allowlist: Arc<Allowlist>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            detector,
            allowlist,
            limiter,
        }
    }

    pub fn allowlist(&self) -> &Arc<Allowlist> {
        &self.allowlist
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn evaluate(&self, event: &InboundEvent, ctx: GuardContext<'_>) -> GuardDecision {
        let decision = self.run_checks(event, ctx).await;
        if let GuardDecision::Suppress(reason) = &decision {
            info!(
                conversation_id = %ctx.conversation_id,
                sender = %event.from,
                reason = %reason,
                "Automated reply suppressed"
            );
        }
        decision
    }

    async fn run_checks(&self, event: &InboundEvent, ctx: GuardContext<'_>) -> GuardDecision {
        let channel = event.channel;

        // 1. Machine-generated mail never opts in or out.
        if let Some(reason) = self.detector.detect(event) {
            return GuardDecision::Suppress(SuppressReason::AutoReply(reason.to_string()));
        }
        match detect_keyword(&event.latest_text()) {
            Some(ControlKeyword::Stop) => {
                self.allowlist.remove(channel, &event.from).await;
                info!(channel = %channel, sender = %event.from, "Sender opted out");
                return GuardDecision::Suppress(SuppressReason::OptedOut);
            }
            Some(ControlKeyword::Start) => {
                self.allowlist.add(channel, &event.from, "opt_in").await;
                info!(channel = %channel, sender = %event.from, "Sender opted in");
            }
            None => {}
        }

        // 2. Forwards from strangers: we are likely only cc'd.
        if !ctx.has_prior_history && event.subject.as_deref().is_some_and(is_forward_subject) {
            return GuardDecision::Suppress(SuppressReason::ForwardedFromUnknown);
        }

        // 3. Allow-list. Only a true first contact is enrolled; a known sender
        // who opted out stays out even when starting a new thread.
        if ctx.is_new_conversation && !ctx.has_prior_history {
            self.allowlist.add(channel, &event.from, "first_contact").await;
        } else if !self.allowlist.contains(channel, &event.from).await {
            return GuardDecision::Suppress(SuppressReason::NotAllowlisted);
        }

        // 4. Rate limit per conversation. The slot is spent by the caller
        // once a send is actually attempted.
        if !self.limiter.peek(ctx.conversation_id) {
            return GuardDecision::Suppress(SuppressReason::RateLimited);
        }

        GuardDecision::Allow
    }
}
