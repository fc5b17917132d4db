//! Memory Store and allow-list backend interfaces.
//!
//! The core treats storage as an ordered, queryable log: entries are
//! appended, searched by channel and by partial match on their free-form
//! `session_metadata` map, and ordered by creation time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::channels::Channel;
use crate::error::DatabaseError;
use crate::threading::subject_key;

/// Metadata keys the matcher reads and the processor writes.
pub mod keys {
    pub const EMAIL_ID: &str = "emailId";
    pub const THREAD_ROOT: &str = "threadRoot";
    pub const FROM: &str = "from";
    pub const TO: &str = "to";
    pub const SUBJECT: &str = "subject";
    /// Subject with reply/forward markers stripped, lowercased.
    pub const SUBJECT_KEY: &str = "subjectKey";
    pub const CALL_SID: &str = "callSid";
    pub const MESSAGE_SID: &str = "messageSid";
    pub const STATUS: &str = "status";
}

/// Author of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

/// One entry of a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub conversation_id: String,
    pub channel: Channel,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub session_metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(conversation_id: impl Into<String>, channel: Channel, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            channel,
            role,
            content: content.into(),
            session_metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Set a metadata key (builder style).
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.session_metadata.insert(key.to_string(), value.into());
        self
    }

    /// Set the subject and its normalized lookup key.
    pub fn with_subject(self, subject: &str) -> Self {
        let key = subject_key(subject);
        let entry = self.with_meta(keys::SUBJECT, subject);
        if key.is_empty() {
            entry
        } else {
            entry.with_meta(keys::SUBJECT_KEY, key)
        }
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// String value of a metadata key.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.session_metadata.get(key).and_then(Value::as_str)
    }

    /// Whether the metadata value at `key` equals `needle`, or is an array
    /// containing it.
    pub fn meta_contains(&self, key: &str, needle: &str) -> bool {
        match self.session_metadata.get(key) {
            Some(Value::String(s)) => s == needle,
            Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(needle)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

/// Search over stored entries.
///
/// `session_metadata` is a partial match: every key given must be present on
/// the entry with an equal value.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryQuery {
    pub channel: Option<Channel>,
    pub session_metadata: Map<String, Value>,
    pub limit: usize,
    pub order_by: OrderBy,
    pub direction: OrderDirection,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            channel: None,
            session_metadata: Map::new(),
            limit: 50,
            order_by: OrderBy::CreatedAt,
            direction: OrderDirection::Desc,
        }
    }
}

impl MemoryQuery {
    pub fn channel(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            ..Default::default()
        }
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.session_metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn ascending(mut self) -> Self {
        self.direction = OrderDirection::Asc;
        self
    }

    /// Whether an entry satisfies the channel and metadata filters.
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if self.channel.is_some_and(|c| c != entry.channel) {
            return false;
        }
        self.session_metadata
            .iter()
            .all(|(k, v)| entry.session_metadata.get(k) == Some(v))
    }
}

/// A conversation session, opened on the first inbound entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub conversation_id: String,
    pub channel: Channel,
    pub participant: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Durable conversation log.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append an entry.
    async fn store(&self, entry: &MemoryEntry) -> Result<(), DatabaseError>;

    /// Filtered, ordered search.
    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, DatabaseError>;

    /// All entries of a conversation, oldest first.
    async fn conversation_history(&self, conversation_id: &str) -> Result<Vec<MemoryEntry>, DatabaseError>;

    async fn start_session(
        &self,
        conversation_id: &str,
        channel: Channel,
        participant: &str,
    ) -> Result<Session, DatabaseError>;

    /// Close a session. Unknown ids fail with `NotFound`.
    async fn end_session(&self, conversation_id: &str, summary: Option<&str>) -> Result<Session, DatabaseError>;

    async fn get_session(&self, conversation_id: &str) -> Result<Option<Session>, DatabaseError>;
}

/// A sender permitted to receive automated replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    /// Normalized address or number.
    pub identifier: String,
    pub channel: Channel,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
}

/// Durable source of truth behind the allow-list cache.
#[async_trait]
pub trait AllowlistBackend: Send + Sync {
    async fn load_all(&self) -> Result<Vec<AllowlistEntry>, DatabaseError>;

    async fn upsert(&self, entry: &AllowlistEntry) -> Result<(), DatabaseError>;

    async fn remove(&self, channel: Channel, identifier: &str) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_partial_metadata_match() {
        let entry = MemoryEntry::new("c1", Channel::Email, Role::User, "hi")
            .with_meta(keys::FROM, "a@x.com")
            .with_meta(keys::SUBJECT, "Quote");

        assert!(MemoryQuery::channel(Channel::Email).meta(keys::FROM, "a@x.com").matches(&entry));
        assert!(!MemoryQuery::channel(Channel::Sms).matches(&entry));
        assert!(!MemoryQuery::default().meta(keys::FROM, "b@x.com").matches(&entry));
        assert!(!MemoryQuery::default().meta(keys::EMAIL_ID, "m1").matches(&entry));
    }

    #[test]
    fn meta_contains_checks_arrays() {
        let entry = MemoryEntry::new("c1", Channel::Email, Role::User, "hi")
            .with_meta(keys::TO, json!(["support@acme.io", "sales@acme.io"]));
        assert!(entry.meta_contains(keys::TO, "sales@acme.io"));
        assert!(!entry.meta_contains(keys::TO, "ops@acme.io"));
    }

    #[test]
    fn role_round_trips_through_db_string() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::from_db(role.as_str()), role);
        }
    }
}
