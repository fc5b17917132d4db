//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use switchboard::channels::Channel;
use switchboard::error::{PipelineError, ProviderError};
use switchboard::parsers::InboundEvent;
use switchboard::pipeline::{AcknowledgementResponder, InboundProcessor, Responder, ToolCall};
use switchboard::router::{ChannelRouters, OutboundMessage, OutboundProvider, ProviderEntry, SentMessage};
use switchboard::safety::{Allowlist, AutoReplyDetector, LoopGuard, RateLimiter};
use switchboard::store::{AllowlistBackend, MemoryEntry, MemoryStore};
use switchboard::tools::ToolRegistry;
use switchboard::tools::builtin::{SEND_MESSAGE, register_builtin_tools};

/// Provider that records what it was asked to send.
pub struct RecordingProvider {
    name: String,
    fail: bool,
    pub sent: Mutex<Vec<OutboundMessage>>,
    counter: Mutex<u32>,
}

impl RecordingProvider {
    pub fn new(name: &str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail,
            sent: Mutex::new(Vec::new()),
            counter: Mutex::new(0),
        })
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundProvider for RecordingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SentMessage, ProviderError> {
        if self.fail {
            return Err(ProviderError::SendFailed {
                provider: self.name.clone(),
                reason: "connection refused".into(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        Ok(SentMessage {
            message_id: Some(format!("{}-{}@acme.io", self.name, *counter)),
        })
    }
}

/// Replies to every allowed message.
pub struct AlwaysReply;

#[async_trait]
impl Responder for AlwaysReply {
    async fn respond(&self, _event: &InboundEvent, _history: &[MemoryEntry]) -> Result<Vec<ToolCall>, PipelineError> {
        Ok(vec![ToolCall::new(SEND_MESSAGE, json!({ "body": "On it." }))])
    }
}

pub struct Gateway {
    pub processor: Arc<InboundProcessor>,
    pub routers: Arc<ChannelRouters>,
    pub allowlist: Arc<Allowlist>,
}

/// Wire a processor over `store` with the given email and SMS providers
/// (name, priority, failing).
pub async fn gateway<S>(
    store: Arc<S>,
    email: &[Arc<RecordingProvider>],
    sms: &[Arc<RecordingProvider>],
    rate_limit: u32,
    responder: Arc<dyn Responder>,
) -> Gateway
where
    S: MemoryStore + AllowlistBackend + 'static,
{
    let routers = Arc::new(ChannelRouters::new());
    for (i, provider) in email.iter().enumerate() {
        routers
            .router(Channel::Email)
            .register(ProviderEntry::new(provider.clone(), i as u32 + 1))
            .await;
    }
    for (i, provider) in sms.iter().enumerate() {
        routers
            .router(Channel::Sms)
            .register(ProviderEntry::new(provider.clone(), i as u32 + 1))
            .await;
    }

    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools, routers.clone(), store.clone()).await;

    let allowlist = Arc::new(Allowlist::new(store.clone()));
    allowlist.load().await.unwrap();
    let limiter = Arc::new(RateLimiter::new(rate_limit, Duration::from_secs(3600)));
    let guard = LoopGuard::new(AutoReplyDetector::default_rules(), allowlist.clone(), limiter);

    let processor = Arc::new(InboundProcessor::new(store, guard, tools, responder));
    Gateway {
        processor,
        routers,
        allowlist,
    }
}

pub fn acknowledge() -> Arc<dyn Responder> {
    Arc::new(AcknowledgementResponder::new("Thanks, we got your message."))
}

/// Postmark inbound payload.
pub fn postmark(from: &str, message_id: &str, subject: &str, in_reply_to: Option<&str>, body: &str) -> Value {
    let mut headers = vec![json!({"Name": "Message-ID", "Value": format!("<{message_id}>")})];
    if let Some(parent) = in_reply_to {
        headers.push(json!({"Name": "In-Reply-To", "Value": format!("<{parent}>")}));
        headers.push(json!({"Name": "References", "Value": format!("<{parent}>")}));
    }
    json!({
        "From": from,
        "To": "support@acme.io",
        "Subject": subject,
        "TextBody": body,
        "MessageID": message_id,
        "Headers": headers,
    })
}

/// Twilio inbound SMS payload.
pub fn twilio_sms(from: &str, sid: &str, body: &str) -> Value {
    json!({
        "From": from,
        "To": "+15550009999",
        "Body": body,
        "MessageSid": sid,
        "NumMedia": "0",
    })
}
