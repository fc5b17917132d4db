//! In-process Memory Store, used by tests and single-node deployments that
//! do not need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::channels::Channel;
use crate::error::DatabaseError;
use crate::store::traits::{
    AllowlistBackend, AllowlistEntry, MemoryEntry, MemoryQuery, MemoryStore, OrderDirection, Session,
};

#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
    sessions: RwLock<HashMap<String, Session>>,
    allowlist: RwLock<HashMap<(Channel, String), AllowlistEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all conversations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, entry: &MemoryEntry) -> Result<(), DatabaseError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn search(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, DatabaseError> {
        let entries = self.entries.read().await;
        // Stable sort keeps insertion order for equal timestamps.
        let mut matched: Vec<MemoryEntry> = entries.iter().filter(|e| query.matches(e)).cloned().collect();
        matched.sort_by_key(|e| e.created_at);
        if query.direction == OrderDirection::Desc {
            matched.reverse();
        }
        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn conversation_history(&self, conversation_id: &str) -> Result<Vec<MemoryEntry>, DatabaseError> {
        let entries = self.entries.read().await;
        let mut history: Vec<MemoryEntry> = entries
            .iter()
            .filter(|e| e.conversation_id == conversation_id)
            .cloned()
            .collect();
        history.sort_by_key(|e| e.created_at);
        Ok(history)
    }

    async fn start_session(
        &self,
        conversation_id: &str,
        channel: Channel,
        participant: &str,
    ) -> Result<Session, DatabaseError> {
        let session = Session {
            conversation_id: conversation_id.to_string(),
            channel,
            participant: participant.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            summary: None,
        };
        self.sessions
            .write()
            .await
            .insert(conversation_id.to_string(), session.clone());
        Ok(session)
    }

    async fn end_session(&self, conversation_id: &str, summary: Option<&str>) -> Result<Session, DatabaseError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(conversation_id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "session".into(),
                id: conversation_id.to_string(),
            })?;
        session.ended_at = Some(Utc::now());
        session.summary = summary.map(String::from);
        Ok(session.clone())
    }

    async fn get_session(&self, conversation_id: &str) -> Result<Option<Session>, DatabaseError> {
        Ok(self.sessions.read().await.get(conversation_id).cloned())
    }
}

#[async_trait]
impl AllowlistBackend for InMemoryStore {
    async fn load_all(&self) -> Result<Vec<AllowlistEntry>, DatabaseError> {
        Ok(self.allowlist.read().await.values().cloned().collect())
    }

    async fn upsert(&self, entry: &AllowlistEntry) -> Result<(), DatabaseError> {
        self.allowlist
            .write()
            .await
            .insert((entry.channel, entry.identifier.clone()), entry.clone());
        Ok(())
    }

    async fn remove(&self, channel: Channel, identifier: &str) -> Result<(), DatabaseError> {
        self.allowlist
            .write()
            .await
            .remove(&(channel, identifier.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::{Role, keys};
    use chrono::Duration;

    #[tokio::test]
    async fn search_orders_and_limits() {
        let store = InMemoryStore::new();
        let base = Utc::now();
        for i in 0..5 {
            let entry = MemoryEntry::new("c1", Channel::Email, Role::User, format!("m{i}"))
                .with_meta(keys::FROM, "a@x.com")
                .with_created_at(base + Duration::seconds(i));
            store.store(&entry).await.unwrap();
        }

        let newest = store
            .search(&MemoryQuery::channel(Channel::Email).meta(keys::FROM, "a@x.com").limit(2))
            .await
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].content, "m4");
        assert_eq!(newest[1].content, "m3");

        let oldest = store
            .search(&MemoryQuery::channel(Channel::Email).ascending().limit(1))
            .await
            .unwrap();
        assert_eq!(oldest[0].content, "m0");
    }

    #[tokio::test]
    async fn history_is_scoped_to_conversation() {
        let store = InMemoryStore::new();
        store
            .store(&MemoryEntry::new("c1", Channel::Sms, Role::User, "a"))
            .await
            .unwrap();
        store
            .store(&MemoryEntry::new("c2", Channel::Sms, Role::User, "b"))
            .await
            .unwrap();
        let history = store.conversation_history("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "a");
    }

    #[tokio::test]
    async fn end_unknown_session_fails() {
        let store = InMemoryStore::new();
        let err = store.end_session("missing", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));

        store.start_session("c1", Channel::Voice, "+1555").await.unwrap();
        let ended = store.end_session("c1", Some("booked")).await.unwrap();
        assert!(ended.ended_at.is_some());
        assert_eq!(ended.summary.as_deref(), Some("booked"));
    }
}
