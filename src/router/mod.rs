//! Outbound provider routing.
//!
//! Each channel has a [`ProviderRouter`] holding registered providers ordered
//! by priority (lower is preferred). Selection goes: forced name (if
//! registered), tag match, recipient-domain match, highest priority. On a
//! send failure without a forced override, the remaining providers are tried
//! in ascending priority and the last error is returned if all fail.

pub mod http;
pub mod smtp;
pub mod twilio;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::channels::Channel;
use crate::error::ProviderError;
use crate::threading::address_domain;

pub use http::{HttpEmailConfig, HttpEmailProvider};
pub use smtp::{SmtpConfig, SmtpProvider};
pub use twilio::{TwilioConfig, TwilioSmsProvider};

/// An outbound message on any channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to: Vec<String>,
    /// Overrides the provider's default sender.
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub in_reply_to: Option<String>,
    /// Oldest first.
    pub references: Vec<String>,
    pub tags: Vec<String>,
    pub conversation_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(channel: Channel, to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel,
            to: vec![to.into()],
            from: None,
            subject: None,
            body: body.into(),
            in_reply_to: None,
            references: Vec::new(),
            tags: Vec::new(),
            conversation_id: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Thread the message under `parent`, extending the parent's chain.
    pub fn in_reply_to(mut self, parent: impl Into<String>, references: Vec<String>) -> Self {
        let parent = parent.into();
        let mut chain = references;
        if !chain.contains(&parent) {
            chain.push(parent.clone());
        }
        self.in_reply_to = Some(parent);
        self.references = chain;
        self
    }

    /// Domain of the first recipient.
    pub fn recipient_domain(&self) -> Option<String> {
        self.to.first().and_then(|r| address_domain(r))
    }
}

/// What a provider reports after accepting a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: Option<String>,
}

/// Result of a routed send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    /// Provider that accepted the message.
    pub provider: String,
    pub message_id: Option<String>,
    /// Providers tried, in order.
    pub attempted: Vec<String>,
}

/// A downstream integration able to deliver outbound messages.
#[async_trait]
pub trait OutboundProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<SentMessage, ProviderError>;
}

/// Registered provider with its routing attributes.
#[derive(Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub priority: u32,
    pub tags: HashSet<String>,
    /// Lowercased recipient domains this provider should handle.
    pub domains: HashSet<String>,
    pub provider: Arc<dyn OutboundProvider>,
}

impl ProviderEntry {
    pub fn new(provider: Arc<dyn OutboundProvider>, priority: u32) -> Self {
        Self {
            name: provider.name().to_string(),
            priority,
            tags: HashSet::new(),
            domains: HashSet::new(),
            provider,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains
            .into_iter()
            .map(|d| d.into().trim().trim_start_matches('@').to_lowercase())
            .collect();
        self
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("domains", &self.domains)
            .finish()
    }
}

/// Provider registry and selector for one channel.
pub struct ProviderRouter {
    channel: Channel,
    entries: RwLock<Vec<ProviderEntry>>,
}

impl ProviderRouter {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Register a provider, replacing any previous one with the same name.
    pub async fn register(&self, entry: ProviderEntry) {
        let mut entries = self.entries.write().await;
        let replaced = entries.iter().any(|e| e.name == entry.name);
        entries.retain(|e| e.name != entry.name);
        info!(
            channel = %self.channel,
            provider = %entry.name,
            priority = entry.priority,
            replaced,
            "Registered outbound provider"
        );
        entries.push(entry);
        // Ties broken by name so registration order never matters.
        entries.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    }

    /// Registered provider names in priority order.
    pub async fn provider_names(&self) -> Vec<String> {
        self.entries.read().await.iter().map(|e| e.name.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn select_provider(&self, message: &OutboundMessage, forced: Option<&str>) -> Option<ProviderEntry> {
        let entries = self.entries.read().await;
        select(&entries, message, forced).cloned()
    }

    /// Send through the selected provider, falling back on failure.
    pub async fn send(&self, message: &OutboundMessage, forced: Option<&str>) -> Result<SendReceipt, ProviderError> {
        let entries = self.entries.read().await.clone();
        let selected = select(&entries, message, forced)
            .cloned()
            .ok_or_else(|| ProviderError::NoProviders {
                channel: self.channel.to_string(),
            })?;

        let mut attempted = vec![selected.name.clone()];
        let first_error = match selected.provider.send(message).await {
            Ok(sent) => return Ok(self.receipt(&selected, sent, attempted)),
            Err(e) => e,
        };

        if forced.is_some() || entries.len() < 2 {
            warn!(
                channel = %self.channel,
                provider = %selected.name,
                error = %first_error,
                "Outbound send failed, no fallback"
            );
            return Err(first_error);
        }

        warn!(
            channel = %self.channel,
            provider = %selected.name,
            error = %first_error,
            "Outbound send failed, trying fallbacks"
        );

        let mut last_error = first_error;
        for entry in entries.iter().filter(|e| e.name != selected.name) {
            attempted.push(entry.name.clone());
            match entry.provider.send(message).await {
                Ok(sent) => {
                    info!(
                        channel = %self.channel,
                        provider = %entry.name,
                        attempts = attempted.len(),
                        "Fallback provider succeeded"
                    );
                    return Ok(self.receipt(entry, sent, attempted));
                }
                Err(e) => {
                    warn!(
                        channel = %self.channel,
                        provider = %entry.name,
                        error = %e,
                        "Fallback provider failed, continuing chain"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn receipt(&self, entry: &ProviderEntry, sent: SentMessage, attempted: Vec<String>) -> SendReceipt {
        debug!(
            channel = %self.channel,
            provider = %entry.name,
            message_id = ?sent.message_id,
            "Outbound message accepted"
        );
        SendReceipt {
            provider: entry.name.clone(),
            message_id: sent.message_id,
            attempted,
        }
    }
}

/// Selection over entries already sorted by priority.
fn select<'a>(entries: &'a [ProviderEntry], message: &OutboundMessage, forced: Option<&str>) -> Option<&'a ProviderEntry> {
    if let Some(name) = forced {
        if let Some(entry) = entries.iter().find(|e| e.name == name) {
            return Some(entry);
        }
        debug!(forced = name, "Forced provider not registered, using normal selection");
    }

    if let Some(entry) = entries
        .iter()
        .find(|e| message.tags.iter().any(|t| e.tags.contains(t)))
    {
        return Some(entry);
    }

    if let Some(domain) = message.recipient_domain() {
        if let Some(entry) = entries.iter().find(|e| e.domains.contains(&domain)) {
            return Some(entry);
        }
    }

    entries.first()
}

/// One router per channel.
pub struct ChannelRouters {
    email: ProviderRouter,
    sms: ProviderRouter,
    voice: ProviderRouter,
}

impl ChannelRouters {
    pub fn new() -> Self {
        Self {
            email: ProviderRouter::new(Channel::Email),
            sms: ProviderRouter::new(Channel::Sms),
            voice: ProviderRouter::new(Channel::Voice),
        }
    }

    pub fn router(&self, channel: Channel) -> &ProviderRouter {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
            Channel::Voice => &self.voice,
        }
    }

    pub async fn send(&self, message: &OutboundMessage, forced: Option<&str>) -> Result<SendReceipt, ProviderError> {
        self.router(message.channel).send(message, forced).await
    }
}

impl Default for ChannelRouters {
    fn default() -> Self {
        Self::new()
    }
}
