//! Allow-list of senders permitted to receive automated replies.
//!
//! Membership checks hit an in-memory cache. Mutations update the cache
//! immediately and are queued for the durable backend until `flush()`.
//! `load()` replaces the cache with the backend's contents.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::channels::Channel;
use crate::error::DatabaseError;
use crate::store::{AllowlistBackend, AllowlistEntry};
use crate::threading::normalize_identifier;

#[derive(Debug, Clone)]
enum PendingOp {
    Upsert(AllowlistEntry),
    Remove(Channel, String),
}

pub struct Allowlist {
    backend: Arc<dyn AllowlistBackend>,
    cache: RwLock<HashMap<(Channel, String), AllowlistEntry>>,
    pending: Mutex<Vec<PendingOp>>,
}

impl Allowlist {
    pub fn new(backend: Arc<dyn AllowlistBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Replace the cache with the durable contents. Returns the entry count.
    pub async fn load(&self) -> Result<usize, DatabaseError> {
        let entries = self.backend.load_all().await?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for entry in entries {
            cache.insert((entry.channel, entry.identifier.clone()), entry);
        }
        info!(entries = cache.len(), "Allow-list loaded");
        Ok(cache.len())
    }

    /// Write queued mutations to the backend in order. On failure the
    /// unwritten operations stay queued.
    pub async fn flush(&self) -> Result<usize, DatabaseError> {
        let mut pending = self.pending.lock().await;
        let ops: Vec<PendingOp> = pending.drain(..).collect();
        let total = ops.len();

        for (i, op) in ops.iter().enumerate() {
            let result = match op {
                PendingOp::Upsert(entry) => self.backend.upsert(entry).await,
                PendingOp::Remove(channel, identifier) => self.backend.remove(*channel, identifier).await,
            };
            if let Err(e) = result {
                warn!(error = %e, remaining = total - i, "Allow-list flush failed");
                pending.extend(ops[i..].iter().cloned());
                return Err(e);
            }
        }

        if total > 0 {
            debug!(ops = total, "Allow-list flushed");
        }
        Ok(total)
    }

    pub async fn contains(&self, channel: Channel, identifier: &str) -> bool {
        let key = (channel, normalize_identifier(channel, identifier));
        self.cache.read().await.contains_key(&key)
    }

    /// Add a sender. Returns `false` when it was already present.
    pub async fn add(&self, channel: Channel, identifier: &str, added_by: &str) -> bool {
        let identifier = normalize_identifier(channel, identifier);
        let key = (channel, identifier.clone());
        let mut cache = self.cache.write().await;
        if cache.contains_key(&key) {
            return false;
        }
        let entry = AllowlistEntry {
            identifier,
            channel,
            added_by: added_by.to_string(),
            added_at: Utc::now(),
        };
        cache.insert(key, entry.clone());
        drop(cache);

        debug!(channel = %channel, identifier = %entry.identifier, added_by, "Allow-list add");
        self.pending.lock().await.push(PendingOp::Upsert(entry));
        true
    }

    /// Remove a sender. Returns `false` when it was not present.
    pub async fn remove(&self, channel: Channel, identifier: &str) -> bool {
        let identifier = normalize_identifier(channel, identifier);
        let removed = self
            .cache
            .write()
            .await
            .remove(&(channel, identifier.clone()))
            .is_some();

        // Queue the delete even for unknown senders so a stale durable row
        // from another instance is cleared too.
        debug!(channel = %channel, identifier = %identifier, removed, "Allow-list remove");
        self.pending.lock().await.push(PendingOp::Remove(channel, identifier));
        removed
    }

    pub async fn get(&self, channel: Channel, identifier: &str) -> Option<AllowlistEntry> {
        let key = (channel, normalize_identifier(channel, identifier));
        self.cache.read().await.get(&key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Number of mutations waiting for `flush()`.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn add_is_visible_before_flush() {
        let backend = Arc::new(InMemoryStore::new());
        let list = Allowlist::new(backend.clone());

        assert!(list.add(Channel::Email, "Alice <ALICE@x.com>", "first_contact").await);
        assert!(!list.add(Channel::Email, "alice@x.com", "first_contact").await);
        assert!(list.contains(Channel::Email, "alice@x.com").await);
        assert!(!list.contains(Channel::Sms, "alice@x.com").await);

        assert!(backend.load_all().await.unwrap().is_empty());
        assert_eq!(list.flush().await.unwrap(), 1);
        assert_eq!(backend.load_all().await.unwrap().len(), 1);
        assert_eq!(list.pending().await, 0);
    }

    #[tokio::test]
    async fn load_replaces_cache_from_backend() {
        let backend = Arc::new(InMemoryStore::new());
        backend
            .upsert(&AllowlistEntry {
                identifier: "+15550001111".into(),
                channel: Channel::Sms,
                added_by: "import".into(),
                added_at: Utc::now(),
            })
            .await
            .unwrap();

        let list = Allowlist::new(backend);
        assert!(!list.contains(Channel::Sms, "+1 555 000 1111").await);
        assert_eq!(list.load().await.unwrap(), 1);
        assert!(list.contains(Channel::Sms, "+1 555 000 1111").await);
    }

    #[tokio::test]
    async fn remove_then_flush_deletes_durably() {
        let backend = Arc::new(InMemoryStore::new());
        let list = Allowlist::new(backend.clone());
        list.add(Channel::Sms, "+15550001111", "first_contact").await;
        list.flush().await.unwrap();

        assert!(list.remove(Channel::Sms, "+15550001111").await);
        assert!(!list.contains(Channel::Sms, "+15550001111").await);
        list.flush().await.unwrap();
        assert!(backend.load_all().await.unwrap().is_empty());
    }

    struct FlakyBackend {
        fail: AtomicBool,
        inner: InMemoryStore,
    }

    #[async_trait]
    impl AllowlistBackend for FlakyBackend {
        async fn load_all(&self) -> Result<Vec<AllowlistEntry>, DatabaseError> {
            self.inner.load_all().await
        }

        async fn upsert(&self, entry: &AllowlistEntry) -> Result<(), DatabaseError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DatabaseError::Query("backend down".into()));
            }
            self.inner.upsert(entry).await
        }

        async fn remove(&self, channel: Channel, identifier: &str) -> Result<(), DatabaseError> {
            self.inner.remove(channel, identifier).await
        }
    }

    #[tokio::test]
    async fn failed_flush_keeps_ops_queued() {
        let backend = Arc::new(FlakyBackend {
            fail: AtomicBool::new(true),
            inner: InMemoryStore::new(),
        });
        let list = Allowlist::new(backend.clone());
        list.add(Channel::Email, "a@x.com", "first_contact").await;
        list.add(Channel::Email, "b@x.com", "first_contact").await;

        assert!(list.flush().await.is_err());
        assert_eq!(list.pending().await, 2);

        backend.fail.store(false, Ordering::SeqCst);
        assert_eq!(list.flush().await.unwrap(), 2);
        assert_eq!(backend.inner.load_all().await.unwrap().len(), 2);
    }
}
