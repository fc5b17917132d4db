//! Conversation matcher.
//!
//! Resolves which stored conversation an inbound event belongs to using a
//! strict cascade. The first step that matches wins; later steps are never
//! consulted, even when they would point somewhere else.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channels::Channel;
use crate::error::DatabaseError;
use crate::parsers::InboundEvent;
use crate::store::{MemoryQuery, MemoryStore, keys};
use crate::threading::{has_reply_marker, normalize_message_id, strip_id_domain, subject_key};

/// Which cascade step produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    DirectReply,
    ReferenceChain,
    Subject,
    Participant,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DirectReply => "direct_reply",
            Self::ReferenceChain => "reference_chain",
            Self::Subject => "subject",
            Self::Participant => "participant",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMatch {
    pub conversation_id: String,
    pub strategy: MatchStrategy,
}

/// Finds the existing conversation for an inbound event.
pub struct ConversationMatcher {
    store: Arc<dyn MemoryStore>,
    /// Candidate entries examined by the participant step.
    search_limit: usize,
}

impl ConversationMatcher {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            search_limit: 200,
        }
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    /// Run the cascade. `None` means the caller must start a new
    /// conversation.
    pub async fn find_conversation(
        &self,
        event: &InboundEvent,
    ) -> Result<Option<ConversationMatch>, DatabaseError> {
        let steps = [
            MatchStrategy::DirectReply,
            MatchStrategy::ReferenceChain,
            MatchStrategy::Subject,
            MatchStrategy::Participant,
        ];

        for strategy in steps {
            let found = match strategy {
                MatchStrategy::DirectReply => self.by_direct_reply(event).await?,
                MatchStrategy::ReferenceChain => self.by_references(event).await?,
                MatchStrategy::Subject => self.by_subject(event).await?,
                MatchStrategy::Participant => self.by_participants(event).await?,
            };
            if let Some(conversation_id) = found {
                debug!(
                    event_id = %event.id,
                    conversation_id = %conversation_id,
                    strategy = %strategy,
                    "Matched existing conversation"
                );
                return Ok(Some(ConversationMatch {
                    conversation_id,
                    strategy,
                }));
            }
        }

        debug!(event_id = %event.id, channel = %event.channel, "No conversation matched");
        Ok(None)
    }

    /// Step 1: the parent id (or, for voice, the call SID) equals a stored
    /// `emailId` / `callSid`.
    async fn by_direct_reply(&self, event: &InboundEvent) -> Result<Option<String>, DatabaseError> {
        if event.channel == Channel::Voice {
            if let Some(call) = &event.call {
                return self.lookup(event.channel, keys::CALL_SID, &call.call_sid).await;
            }
            return Ok(None);
        }

        let Some(parent) = event.threading.in_reply_to.as_deref() else {
            return Ok(None);
        };
        let parent = normalize_message_id(parent);
        if parent.is_empty() {
            return Ok(None);
        }
        if let Some(found) = self.lookup_message_id(event.channel, &parent).await? {
            return Ok(Some(found));
        }

        // Some providers store ids without the domain suffix.
        match strip_id_domain(&parent) {
            Some(local) => self.lookup_message_id(event.channel, local).await,
            None => Ok(None),
        }
    }

    /// Step 2: any id of the reference chain equals a stored `emailId`; the
    /// chain root is also compared with stored `threadRoot`.
    async fn by_references(&self, event: &InboundEvent) -> Result<Option<String>, DatabaseError> {
        let refs = &event.threading.references;
        if refs.is_empty() {
            return Ok(None);
        }

        for id in refs.iter().rev() {
            if let Some(found) = self.lookup_message_id(event.channel, id).await? {
                return Ok(Some(found));
            }
        }

        match refs.first() {
            Some(root) => self.lookup(event.channel, keys::THREAD_ROOT, root).await,
            None => Ok(None),
        }
    }

    /// Step 3: a reply/forward subject, markers stripped, equals a stored
    /// subject key. Same sender first, then anyone on the channel.
    async fn by_subject(&self, event: &InboundEvent) -> Result<Option<String>, DatabaseError> {
        let Some(subject) = event.subject.as_deref() else {
            return Ok(None);
        };
        if !has_reply_marker(subject) {
            return Ok(None);
        }
        let wanted = subject_key(subject);
        if wanted.is_empty() {
            return Ok(None);
        }

        let same_sender = self
            .store
            .search(
                &MemoryQuery::channel(event.channel)
                    .meta(keys::FROM, event.from.as_str())
                    .meta(keys::SUBJECT_KEY, wanted.as_str())
                    .limit(1),
            )
            .await?;
        if let Some(entry) = same_sender.into_iter().next() {
            return Ok(Some(entry.conversation_id));
        }

        self.lookup(event.channel, keys::SUBJECT_KEY, &wanted).await
    }

    /// Step 4: same sender, and the stored recipients include one of ours.
    async fn by_participants(&self, event: &InboundEvent) -> Result<Option<String>, DatabaseError> {
        if event.to.is_empty() {
            return Ok(None);
        }
        let candidates = self
            .store
            .search(
                &MemoryQuery::channel(event.channel)
                    .meta(keys::FROM, event.from.as_str())
                    .limit(self.search_limit),
            )
            .await?;
        Ok(candidates
            .iter()
            .find(|entry| event.to.iter().any(|r| entry.meta_contains(keys::TO, r)))
            .map(|e| e.conversation_id.clone()))
    }

    async fn lookup_message_id(&self, channel: Channel, id: &str) -> Result<Option<String>, DatabaseError> {
        self.lookup(channel, keys::EMAIL_ID, id).await
    }

    /// Newest entry whose metadata `key` equals `value`.
    async fn lookup(&self, channel: Channel, key: &str, value: &str) -> Result<Option<String>, DatabaseError> {
        let found = self
            .store
            .search(&MemoryQuery::channel(channel).meta(key, value).limit(1))
            .await?;
        Ok(found.into_iter().next().map(|e| e.conversation_id))
    }
}
