//! Local persistence of collection snapshots and the retry queue.

mod memory;
mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::{create_pool, run_migrations, SqliteKv};

use crate::error::Result;
use async_trait::async_trait;
use fitsync_engine::{CollectionKind, CollectionSnapshot, RetryQueue};
use std::sync::Arc;

/// Byte-oriented key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Values for several keys, in key order.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value).await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key.
    async fn clear(&self) -> Result<()>;
}

/// Snapshot storage under stable per-owner keys.
#[derive(Clone)]
pub struct LocalPersistence {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalPersistence {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn collection_key(owner_id: &str, kind: CollectionKind) -> String {
        format!("fitsync/{}/{}", owner_id, kind)
    }

    pub fn retry_queue_key(owner_id: &str) -> String {
        format!("fitsync/{}/retryQueue", owner_id)
    }

    pub async fn save_collection(&self, snapshot: &CollectionSnapshot) -> Result<()> {
        let key = Self::collection_key(&snapshot.owner_id, snapshot.collection);
        let bytes = serde_json::to_vec(snapshot)?;
        self.kv.set(&key, bytes).await
    }

    pub async fn load_collection(
        &self,
        owner_id: &str,
        kind: CollectionKind,
    ) -> Result<Option<CollectionSnapshot>> {
        match self.kv.get(&Self::collection_key(owner_id, kind)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every persisted collection of an owner, read in one batch.
    pub async fn load_all(&self, owner_id: &str) -> Result<Vec<CollectionSnapshot>> {
        let keys: Vec<String> = CollectionKind::ALL
            .iter()
            .map(|kind| Self::collection_key(owner_id, *kind))
            .collect();

        let mut snapshots = Vec::new();
        for bytes in self.kv.multi_get(&keys).await?.into_iter().flatten() {
            snapshots.push(serde_json::from_slice(&bytes)?);
        }
        Ok(snapshots)
    }

    pub async fn save_retry_queue(&self, owner_id: &str, queue: &RetryQueue) -> Result<()> {
        let bytes = serde_json::to_vec(queue)?;
        self.kv.set(&Self::retry_queue_key(owner_id), bytes).await
    }

    /// The persisted queue, or an empty one.
    pub async fn load_retry_queue(&self, owner_id: &str) -> Result<RetryQueue> {
        match self.kv.get(&Self::retry_queue_key(owner_id)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(RetryQueue::new()),
        }
    }

    /// Remove everything persisted for an owner.
    pub async fn forget_owner(&self, owner_id: &str) -> Result<()> {
        for kind in CollectionKind::ALL {
            self.kv.remove(&Self::collection_key(owner_id, kind)).await?;
        }
        self.kv.remove(&Self::retry_queue_key(owner_id)).await
    }
}
