// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Replicated Cache
//!
//! Contract for the eventually-consistent routing-metadata cache, plus an
//! in-memory implementation converging last-writer-wins by revision.
//!
//! Change notifications are pushed over a tokio broadcast channel; every
//! notification carries the entity id, so subscribers drop unrelated traffic
//! without touching their state.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::domain::cache::CacheEntry;
use crate::domain::entity::EntityId;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("replicated cache unavailable: {0}")]
    Unavailable(String),
}

/// Eventually-consistent key/value store of [`CacheEntry`] records.
#[async_trait]
pub trait ReplicatedCache: Send + Sync {
    /// Point lookup by entity id.
    async fn get(&self, id: &EntityId) -> Result<Option<CacheEntry>, CacheError>;

    /// Write an entry; stale writes (per the LWW merge rule) are ignored.
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Register for change notifications. The feed carries every accepted
    /// write; subscribers filter by entity id.
    fn register(&self) -> broadcast::Receiver<CacheEntry>;
}

/// In-memory convergent cache used by tests and single-node deployments.
pub struct InMemoryReplicatedCache {
    entries: RwLock<HashMap<EntityId, CacheEntry>>,
    changes: broadcast::Sender<CacheEntry>,
}

impl InMemoryReplicatedCache {
    pub fn new(notification_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(notification_capacity);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ReplicatedCache for InMemoryReplicatedCache {
    async fn get(&self, id: &EntityId) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().get(id).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let accepted = {
            let mut entries = self.entries.write();
            match entries.get(&entry.entity_id) {
                Some(existing) if !entry.supersedes(existing) => false,
                _ => {
                    entries.insert(entry.entity_id.clone(), entry.clone());
                    true
                }
            }
        };

        if accepted {
            debug!(
                entity_id = %entry.entity_id,
                revision = entry.revision,
                deleted = entry.deleted,
                "cache entry accepted"
            );
            // receiver_count may be zero; an unobserved write is still a write
            let _ = self.changes.send(entry);
        } else {
            trace!(entity_id = %entry.entity_id, revision = entry.revision, "stale cache write ignored");
        }
        Ok(())
    }

    fn register(&self) -> broadcast::Receiver<CacheEntry> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::SCHEMA_VERSION_CURRENT;

    fn entry(id: &str, revision: i64) -> CacheEntry {
        CacheEntry {
            entity_id: EntityId::new(id),
            revision,
            deleted: false,
            schema_version: SCHEMA_VERSION_CURRENT,
            policy_id: None,
        }
    }

    #[test]
    fn test_len_tracks_distinct_entities() {
        let cache = InMemoryReplicatedCache::new(16);
        assert!(cache.is_empty());
        tokio_test::block_on(cache.put(entry("thing:1", 1))).unwrap();
        tokio_test::block_on(cache.put(entry("thing:2", 1))).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = InMemoryReplicatedCache::new(16);
        cache.put(entry("thing:1", 1)).await.unwrap();

        let got = cache.get(&EntityId::new("thing:1")).await.unwrap().unwrap();
        assert_eq!(got.revision, 1);
        assert!(cache.get(&EntityId::new("thing:2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_write_ignored() {
        let cache = InMemoryReplicatedCache::new(16);
        cache.put(entry("thing:1", 5)).await.unwrap();
        cache.put(entry("thing:1", 3)).await.unwrap();

        let got = cache.get(&EntityId::new("thing:1")).await.unwrap().unwrap();
        assert_eq!(got.revision, 5);
    }

    #[tokio::test]
    async fn test_accepted_write_notifies_subscribers() {
        let cache = InMemoryReplicatedCache::new(16);
        let mut feed = cache.register();

        cache.put(entry("thing:1", 1)).await.unwrap();
        let notified = feed.recv().await.unwrap();
        assert_eq!(notified.entity_id.as_str(), "thing:1");

        // A stale write must not notify.
        cache.put(entry("thing:1", 1)).await.unwrap();
        assert!(matches!(
            feed.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
