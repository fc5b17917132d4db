//! Inbound processor: one webhook payload in, one outcome out.
//!
//! The user entry is stored before the guard runs, so suppressed messages
//! still land in the conversation log and later replies can match them.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::Channel;
use crate::error::{DatabaseError, PipelineError};
use crate::matcher::ConversationMatcher;
use crate::parsers::{self, InboundEvent, ProviderKind};
use crate::pipeline::types::{InboundOutcome, OutcomeStatus, Responder, ToolInvocation};
use crate::safety::{GuardContext, GuardDecision, LoopGuard, SuppressReason};
use crate::store::{MemoryEntry, MemoryQuery, MemoryStore, Role, keys};
use crate::tools::builtin::SEND_MESSAGE;
use crate::tools::{ReplyContext, ToolContext, ToolRegistry, ToolResult};

pub struct InboundProcessor {
    store: Arc<dyn MemoryStore>,
    matcher: ConversationMatcher,
    guard: LoopGuard,
    tools: Arc<ToolRegistry>,
    responder: Arc<dyn Responder>,
}

impl InboundProcessor {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        guard: LoopGuard,
        tools: Arc<ToolRegistry>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            matcher: ConversationMatcher::new(store.clone()),
            store,
            guard,
            tools,
            responder,
        }
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.guard
    }

    /// Handle a raw payload for a provider tag such as `"postmark"`.
    pub async fn handle(&self, provider: &str, raw: &Value) -> InboundOutcome {
        match provider.parse::<ProviderKind>() {
            Ok(kind) => self.handle_as(kind, raw).await,
            Err(e) => {
                warn!(provider, error = %e, "Rejected webhook");
                InboundOutcome::rejected(provider, e.to_string())
            }
        }
    }

    pub async fn handle_as(&self, kind: ProviderKind, raw: &Value) -> InboundOutcome {
        match parsers::parse_as(raw, kind) {
            Ok(event) => self.process_event(event).await,
            Err(e) => {
                warn!(provider = kind.as_str(), error = %e, "Rejected webhook payload");
                InboundOutcome::rejected(kind.as_str(), e.to_string())
            }
        }
    }

    /// Run an already-parsed event through the pipeline.
    pub async fn process_event(&self, event: InboundEvent) -> InboundOutcome {
        info!(
            id = %event.id,
            channel = %event.channel,
            provider = event.provider.as_str(),
            sender = %event.from,
            "Processing inbound event"
        );

        let mut outcome = InboundOutcome {
            provider: event.provider.as_str().to_string(),
            channel: Some(event.channel),
            event_id: Some(event.id.clone()),
            conversation_id: None,
            is_new_conversation: false,
            matched_by: None,
            decision: None,
            tool_results: Vec::new(),
            status: OutcomeStatus::NoAction,
        };

        if let Err(e) = self.run(&event, &mut outcome).await {
            warn!(id = %event.id, error = %e, "Inbound processing failed");
            outcome.status = OutcomeStatus::Failed { reason: e.to_string() };
        }

        // Allow-list changes made by the guard are persisted whatever happened.
        if let Err(e) = self.guard.allowlist().flush().await {
            warn!(error = %e, "Allow-list flush failed, changes stay queued");
        }

        info!(
            id = %event.id,
            conversation_id = outcome.conversation_id.as_deref().unwrap_or("-"),
            status = outcome.status.label(),
            "Inbound event processed"
        );
        outcome
    }

    async fn run(&self, event: &InboundEvent, outcome: &mut InboundOutcome) -> Result<(), PipelineError> {
        let found = self.matcher.find_conversation(event).await?;
        let has_prior_history = self.has_history(event).await?;

        let (conversation_id, is_new) = match found {
            Some(m) => {
                outcome.matched_by = Some(m.strategy);
                (m.conversation_id, false)
            }
            None => (Uuid::new_v4().to_string(), true),
        };
        outcome.conversation_id = Some(conversation_id.clone());
        outcome.is_new_conversation = is_new;

        if is_new {
            self.store
                .start_session(&conversation_id, event.channel, &event.from)
                .await?;
            debug!(conversation_id = %conversation_id, "Started conversation");
        }
        self.store.store(&user_entry(&conversation_id, event)).await?;

        let decision = self
            .guard
            .evaluate(
                event,
                GuardContext {
                    conversation_id: &conversation_id,
                    is_new_conversation: is_new,
                    has_prior_history,
                },
            )
            .await;
        outcome.decision = Some(decision.clone());
        if let GuardDecision::Suppress(reason) = decision {
            outcome.status = OutcomeStatus::Suppressed { reason };
            return Ok(());
        }

        let history = self.store.conversation_history(&conversation_id).await?;
        let calls = self.responder.respond(event, &history).await?;
        if calls.is_empty() {
            outcome.status = OutcomeStatus::NoAction;
            return Ok(());
        }

        // Only an attempted send spends a rate-limit slot.
        let sends = calls.iter().any(|c| c.name == SEND_MESSAGE);
        if sends && !self.guard.limiter().check(&conversation_id) {
            let reason = SuppressReason::RateLimited;
            info!(conversation_id = %conversation_id, "Automated reply suppressed at send time");
            outcome.decision = Some(GuardDecision::Suppress(reason.clone()));
            outcome.status = OutcomeStatus::Suppressed { reason };
            return Ok(());
        }

        let ctx = tool_context(&conversation_id, event);
        let mut sent = 0usize;
        let mut failures = Vec::new();
        for call in calls {
            let result = match self.tools.execute(&call.name, call.params.clone(), &ctx).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Responder requested an unknown tool");
                    ToolResult::failure(e.to_string())
                }
            };

            if result.success && call.name == SEND_MESSAGE {
                if let Some(data) = &result.data {
                    self.store
                        .store(&assistant_entry(&conversation_id, event, data))
                        .await?;
                }
                sent += 1;
            } else if !result.success {
                failures.push(format!("{}: {}", call.name, result.error.as_deref().unwrap_or("failed")));
            }

            outcome.tool_results.push(ToolInvocation {
                name: call.name,
                result,
            });
        }

        outcome.status = if sent > 0 {
            OutcomeStatus::Replied
        } else if !failures.is_empty() {
            OutcomeStatus::Failed {
                reason: failures.join("; "),
            }
        } else {
            OutcomeStatus::NoAction
        };
        Ok(())
    }

    /// Whether the sender has any stored entry on this channel.
    async fn has_history(&self, event: &InboundEvent) -> Result<bool, DatabaseError> {
        let query = MemoryQuery::channel(event.channel)
            .meta(keys::FROM, event.from.as_str())
            .limit(1);
        Ok(!self.store.search(&query).await?.is_empty())
    }
}

/// Stored form of the inbound event, carrying the keys the matcher reads.
fn user_entry(conversation_id: &str, event: &InboundEvent) -> MemoryEntry {
    let mut entry = MemoryEntry::new(conversation_id, event.channel, Role::User, event.body.as_str())
        .with_meta(keys::FROM, event.from.as_str())
        .with_meta(keys::TO, json!(event.to));

    if let Some(subject) = &event.subject {
        entry = entry.with_subject(subject);
    }
    match event.channel {
        Channel::Email => {
            if let Some(id) = &event.threading.message_id {
                entry = entry.with_meta(keys::EMAIL_ID, id.as_str());
            }
            if let Some(root) = event.threading.thread_root() {
                entry = entry.with_meta(keys::THREAD_ROOT, root);
            }
        }
        Channel::Sms => entry = entry.with_meta(keys::MESSAGE_SID, event.id.as_str()),
        Channel::Voice => {
            entry = entry.with_meta(keys::CALL_SID, event.id.as_str());
            if let Some(status) = event.call.as_ref().and_then(|c| c.status.as_deref()) {
                entry = entry.with_meta(keys::STATUS, status);
            }
        }
    }
    entry
}

/// Stored form of a successful `send_message`.
fn assistant_entry(conversation_id: &str, event: &InboundEvent, sent: &Value) -> MemoryEntry {
    let body = sent.get("body").and_then(Value::as_str).unwrap_or_default();
    let mut entry = MemoryEntry::new(conversation_id, event.channel, Role::Assistant, body)
        .with_meta(keys::TO, sent.get("to").cloned().unwrap_or_else(|| json!([event.from])))
        .with_meta(keys::STATUS, "sent");

    if let Some(from) = event.primary_recipient() {
        entry = entry.with_meta(keys::FROM, from);
    }
    if let Some(subject) = sent.get("subject").and_then(Value::as_str) {
        entry = entry.with_subject(subject);
    }
    if event.channel == Channel::Email {
        if let Some(root) = event.threading.thread_root() {
            entry = entry.with_meta(keys::THREAD_ROOT, root);
        }
    }
    if let Some(message_id) = sent.get("messageId").and_then(Value::as_str) {
        let key = match event.channel {
            Channel::Email => keys::EMAIL_ID,
            Channel::Sms | Channel::Voice => keys::MESSAGE_SID,
        };
        entry = entry.with_meta(key, message_id);
    }
    entry
}

fn tool_context(conversation_id: &str, event: &InboundEvent) -> ToolContext {
    let mut ctx = ToolContext::new(conversation_id, event.channel).with_recipient(event.from.as_str());
    if event.channel == Channel::Email {
        ctx = ctx.with_reply(ReplyContext {
            message_id: event.threading.message_id.clone(),
            references: event.threading.references.clone(),
            subject: event.subject.clone(),
        });
    }
    ctx.metadata.insert("eventId".into(), json!(event.id));
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::testing::MockProvider;
    use crate::router::{ChannelRouters, ProviderEntry};
    use crate::safety::{Allowlist, AutoReplyDetector, RateLimiter, SuppressReason};
    use crate::store::InMemoryStore;
    use crate::tools::builtin::register_builtin_tools;
    use crate::pipeline::AcknowledgementResponder;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        processor: InboundProcessor,
        store: Arc<InMemoryStore>,
        email: Arc<MockProvider>,
    }

    async fn harness(limit: u32) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let email = MockProvider::new("smtp", false, calls.clone());
        let routers = Arc::new(ChannelRouters::new());
        routers.router(Channel::Email).register(ProviderEntry::new(email.clone(), 1)).await;
        routers
            .router(Channel::Sms)
            .register(ProviderEntry::new(MockProvider::new("twilio", false, calls), 1))
            .await;

        let tools = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tools, routers, store.clone()).await;

        let guard = LoopGuard::new(
            AutoReplyDetector::default_rules(),
            Arc::new(Allowlist::new(store.clone())),
            Arc::new(RateLimiter::new(limit, Duration::from_secs(3600))),
        );
        let processor = InboundProcessor::new(
            store.clone(),
            guard,
            tools,
            Arc::new(AcknowledgementResponder::new("Thanks!")),
        );
        Harness {
            processor,
            store,
            email,
        }
    }

    fn postmark(message_id: &str, subject: &str, in_reply_to: Option<&str>) -> Value {
        let mut headers = vec![json!({"Name": "Message-ID", "Value": format!("<{message_id}>")})];
        if let Some(parent) = in_reply_to {
            headers.push(json!({"Name": "In-Reply-To", "Value": format!("<{parent}>")}));
        }
        json!({
            "From": "Alice <alice@x.com>",
            "To": "support@acme.io",
            "Subject": subject,
            "TextBody": "Could you send a quote?",
            "MessageID": message_id,
            "Date": "Sat, 5 Apr 2025 10:00:00 +0000",
            "Headers": headers,
        })
    }

    #[tokio::test]
    async fn first_email_is_acknowledged_and_threaded_back() {
        let h = harness(10).await;
        let first = h.processor.handle("postmark", &postmark("m-1@x.com", "Quote Request", None)).await;
        assert_eq!(first.status, OutcomeStatus::Replied);
        assert!(first.is_new_conversation);
        let conversation = first.conversation_id.clone().unwrap();

        // The reply threads under our acknowledgement.
        let ack = h.email.sent.lock().unwrap()[0].clone();
        assert_eq!(ack.in_reply_to.as_deref(), Some("m-1@x.com"));
        assert_eq!(ack.subject.as_deref(), Some("Re: Quote Request"));

        let second = h
            .processor
            .handle("postmark", &postmark("m-2@x.com", "Re: Quote Request", Some("smtp-msg")))
            .await;
        assert_eq!(second.conversation_id.as_deref(), Some(conversation.as_str()));
        assert_eq!(second.matched_by, Some(crate::matcher::MatchStrategy::DirectReply));
        // Already acknowledged.
        assert_eq!(second.status, OutcomeStatus::NoAction);

        let history = h.store.conversation_history(&conversation).await.unwrap();
        let roles: Vec<Role> = history.iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(history[1].meta_str(keys::EMAIL_ID), Some("smtp-msg"));
    }

    #[tokio::test]
    async fn messages_without_a_send_leave_the_rate_window_alone() {
        let h = harness(2).await;
        let first = h.processor.handle("postmark", &postmark("r-1@x.com", "Booking", None)).await;
        assert_eq!(first.status, OutcomeStatus::Replied);
        let conversation = first.conversation_id.clone().unwrap();

        // Already acknowledged, so nothing is sent and no slot is spent.
        for (i, id) in ["r-2@x.com", "r-3@x.com", "r-4@x.com"].iter().enumerate() {
            let follow_up = h
                .processor
                .handle("postmark", &postmark(id, "Re: Booking", Some("smtp-msg")))
                .await;
            assert_eq!(follow_up.status, OutcomeStatus::NoAction, "follow-up {i}");
        }
        let window = h.processor.guard().limiter().state(&conversation).unwrap();
        assert_eq!(window.count, 1);
    }

    #[tokio::test]
    async fn auto_reply_is_stored_but_suppressed() {
        let h = harness(10).await;
        let mut payload = postmark("ooo-1@x.com", "Out of Office: Quote Request", None);
        payload["Headers"]
            .as_array_mut()
            .unwrap()
            .push(json!({"Name": "Auto-Submitted", "Value": "auto-replied"}));

        let outcome = h.processor.handle("postmark", &payload).await;
        assert!(matches!(
            outcome.status,
            OutcomeStatus::Suppressed {
                reason: SuppressReason::AutoReply(_)
            }
        ));
        assert!(h.email.sent.lock().unwrap().is_empty());
        let history = h
            .store
            .conversation_history(outcome.conversation_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_provider_is_rejected() {
        let h = harness(10).await;
        let outcome = h.processor.handle("carrier-pigeon", &json!({})).await;
        assert!(matches!(outcome.status, OutcomeStatus::Rejected { .. }));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn sms_stop_opts_out() {
        let h = harness(10).await;
        let sms = |sid: &str, body: &str| {
            json!({"From": "+15550001111", "To": "+15550009999", "Body": body, "MessageSid": sid})
        };

        let first = h.processor.handle("twilio", &sms("SM1", "Hello")).await;
        assert_eq!(first.status, OutcomeStatus::Replied);

        let stop = h.processor.handle("twilio", &sms("SM2", "STOP")).await;
        assert_eq!(
            stop.status,
            OutcomeStatus::Suppressed {
                reason: SuppressReason::OptedOut
            }
        );
        assert_eq!(stop.conversation_id, first.conversation_id);
        assert!(
            !h.processor
                .guard()
                .allowlist()
                .contains(Channel::Sms, "+15550001111")
                .await
        );
    }
}
