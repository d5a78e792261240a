//! The durable state store boundary.
//!
//! The engine consumes the [`EntityStore`] trait; backends decide durability.
//! [`MemoryStore`] is the in-process implementation with the same lazy-expiry
//! TTL semantics a Redis `SETEX`-backed store would give.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::entity::{EntityRecord, EntityStatus};
use crate::error::StoreError;

/// Key-value access to entity records by id.
///
/// Implementations must be safe for concurrent use; the engine serializes
/// attempts per entity, so no conditional-overwrite support is required.
#[async_trait]
pub trait EntityStore<S: EntityStatus>: Send + Sync + 'static {
    async fn get(&self, id: &str) -> Result<Option<EntityRecord<S>>, StoreError>;

    /// Persist a record, optionally with a time-to-live after which `get`
    /// reports it absent.
    async fn put(
        &self,
        record: EntityRecord<S>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;
}

struct Slot<S: EntityStatus> {
    record: EntityRecord<S>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process store backed by a `HashMap`. Expiry is checked lazily on read.
pub struct MemoryStore<S: EntityStatus> {
    slots: RwLock<HashMap<String, Slot<S>>>,
}

impl<S: EntityStatus> MemoryStore<S> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.expires_at.is_none_or(|at| at > now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<S: EntityStatus> Default for MemoryStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: EntityStatus> EntityStore<S> for MemoryStore<S> {
    async fn get(&self, id: &str) -> Result<Option<EntityRecord<S>>, StoreError> {
        {
            let slots = self.slots.read().await;
            match slots.get(id) {
                Some(slot) if slot.expires_at.is_none_or(|at| at > Utc::now()) => {
                    return Ok(Some(slot.record.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: take the write lock and free the slot. A concurrent put
        // may have refreshed the record in between, so re-check first.
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(id) {
            if slot.expires_at.is_none_or(|at| at > Utc::now()) {
                return Ok(Some(slot.record.clone()));
            }
            slots.remove(id);
        }
        Ok(None)
    }

    async fn put(
        &self,
        record: EntityRecord<S>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        let mut slots = self.slots.write().await;
        slots.insert(record.id.clone(), Slot { record, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum S {
        A,
        B,
    }

    impl EntityStatus for S {
        fn name(&self) -> &'static str {
            match self {
                S::A => "a",
                S::B => "b",
            }
        }
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryStore::new();
        let record = EntityRecord::with_id("e-1", S::A, serde_json::Value::Null);
        store.put(record, None).await.unwrap();

        let loaded = store.get("e-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "e-1");
        assert_eq!(loaded.status, S::A);
        assert!(store.get("e-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = MemoryStore::new();
        let mut record = EntityRecord::with_id("e-1", S::A, serde_json::Value::Null);
        store.put(record.clone(), None).await.unwrap();
        record.status = S::B;
        record.version = 1;
        store.put(record, None).await.unwrap();

        let loaded = store.get("e-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, S::B);
        assert_eq!(loaded.version, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn ttl_expires_records() {
        let store = MemoryStore::new();
        let record = EntityRecord::with_id("e-1", S::A, serde_json::Value::Null);
        store
            .put(record, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        assert!(store.get("e-1").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("e-1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn expired_slots_are_freed_on_read() {
        let store = MemoryStore::new();
        for n in 0..10 {
            store
                .put(
                    EntityRecord::with_id(format!("e-{n}"), S::A, serde_json::Value::Null),
                    Some(Duration::from_millis(10)),
                )
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        for n in 0..10 {
            assert!(store.get(&format!("e-{n}")).await.unwrap().is_none());
        }
        // The slots themselves are gone, not just hidden by the expiry check.
        assert_eq!(store.slots.read().await.len(), 0);
    }
}
