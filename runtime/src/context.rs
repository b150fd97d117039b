//! Shared services, constructed once and passed to every component.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::identity::Identity;
use crate::locks::KeyedLocks;
use crate::network::ConnectivityMonitor;
use crate::persistence::{KeyValueStore, LocalPersistence, SqliteKv};
use crate::remote::{delete_record, write_record, RemoteStore, WriteAttempt};
use fitsync_engine::{
    CollectionKind, FailureClass, OwnerId, PassReport, RecordId, RecordStore, RemoteFailure,
    RetryQueue, Schema, Timestamp, UpsertStep,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

const NOTICE_CAPACITY: usize = 64;

/// Things hosts may want to show the user.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    /// A queued write failed permanently and was dropped
    Discarded {
        collection: CollectionKind,
        record_id: RecordId,
        reason: String,
    },
    /// A queued write has failed `attempts` times and is still being retried
    RetryStalled {
        collection: CollectionKind,
        record_id: RecordId,
        attempts: u32,
    },
    PassCompleted(PassReport),
}

impl SyncNotice {
    /// Whether the user should be told.
    pub fn is_user_facing(&self) -> bool {
        match self {
            SyncNotice::Discarded { .. } | SyncNotice::RetryStalled { .. } => true,
            SyncNotice::PassCompleted(report) => {
                report.permanent_failures().next().is_some()
            }
        }
    }
}

/// Services shared by the mutation functions, reconciler, retry worker and
/// coordinator.
///
/// The store and queue locks are never held across an `.await`. Remote
/// writes of one record and saves of one persisted key are serialized
/// through async locks, so a later state always lands after an earlier one.
pub struct SyncContext {
    pub config: SyncConfig,
    pub store: Arc<Mutex<RecordStore>>,
    pub remote: Arc<dyn RemoteStore>,
    pub persistence: LocalPersistence,
    pub network: ConnectivityMonitor,
    pub identity: Identity,
    pub retry_queue: Arc<Mutex<RetryQueue>>,
    notices: broadcast::Sender<SyncNotice>,
    record_writes: KeyedLocks<(CollectionKind, RecordId)>,
    collection_saves: KeyedLocks<CollectionKind>,
    queue_saves: tokio::sync::Mutex<()>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Arc::new(Self {
            config,
            store: Arc::new(Mutex::new(RecordStore::new(Schema::fitness()))),
            remote,
            persistence: LocalPersistence::new(kv),
            network: ConnectivityMonitor::default(),
            identity: Identity::new(),
            retry_queue: Arc::new(Mutex::new(RetryQueue::new())),
            notices,
            record_writes: KeyedLocks::new(),
            collection_saves: KeyedLocks::new(),
            queue_saves: tokio::sync::Mutex::new(()),
        })
    }

    /// Build a context persisting to the configured SQLite database.
    pub async fn from_config(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Arc<Self>> {
        let kv = SqliteKv::connect(&config.database_url).await?;
        Ok(Self::new(config, remote, Arc::new(kv)))
    }

    /// Milliseconds since the Unix epoch.
    pub fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis().max(0) as Timestamp
    }

    /// Owner whose records are loaded in the store.
    pub fn owner_id(&self) -> Option<OwnerId> {
        self.store.lock().owner_id().cloned()
    }

    /// Write a record's current state remotely, starting at `start`.
    ///
    /// Waits for any other write of the same record, then reads the record
    /// afresh. `None` when it no longer needs a write (synced by someone
    /// else, tombstoned or purged meanwhile).
    pub async fn write_pending(
        &self,
        kind: CollectionKind,
        id: &str,
        start: UpsertStep,
    ) -> Option<WriteAttempt> {
        let _write = self.record_writes.lock((kind, id.to_string())).await;
        let (revision, record) = self.store.lock().pending_write(kind, id)?;
        let (result, calls) = write_record(self.remote.as_ref(), &record, start).await;
        Some(WriteAttempt {
            revision,
            result,
            calls,
        })
    }

    /// Delete a record remotely, after any in-flight write of it.
    ///
    /// An already-missing record counts as deleted.
    pub async fn delete_remote(
        &self,
        kind: CollectionKind,
        id: &str,
    ) -> std::result::Result<(), RemoteFailure> {
        let _write = self.record_writes.lock((kind, id.to_string())).await;
        delete_record(self.remote.as_ref(), kind, id).await
    }

    /// Write a collection's current state to local persistence.
    ///
    /// Saves of one collection are serialized and each exports the store
    /// only once it holds the save lock, so an older snapshot never lands
    /// after a newer one. A no-op when nobody is signed in.
    pub async fn persist_collection(&self, kind: CollectionKind) -> Result<()> {
        let _save = self.collection_saves.lock(kind).await;
        let snapshot = {
            let store = self.store.lock();
            if store.owner_id().is_none() {
                return Ok(());
            }
            store.export_collection(kind)?
        };
        self.persistence.save_collection(&snapshot).await
    }

    /// Persist several collections, logging instead of failing.
    ///
    /// The in-memory store stays authoritative; the next write retries.
    pub async fn persist_collections(&self, kinds: &[CollectionKind]) {
        for kind in kinds {
            if let Err(e) = self.persist_collection(*kind).await {
                tracing::warn!(collection = %kind, error = %e, "failed to persist collection");
            }
        }
    }

    pub async fn persist_retry_queue(&self) -> Result<()> {
        let _save = self.queue_saves.lock().await;
        let Some(owner) = self.owner_id() else {
            return Ok(());
        };
        let queue = self.retry_queue.lock().clone();
        self.persistence.save_retry_queue(&owner, &queue).await
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    /// Broadcast a notice. Dropped silently when nobody listens.
    pub fn notify(&self, notice: SyncNotice) {
        let _ = self.notices.send(notice);
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("owner_id", &self.owner_id())
            .field("connected", &self.network.is_connected())
            .field("queued", &self.retry_queue.lock().len())
            .finish()
    }
}

/// Log a per-record failure at the level its class deserves.
pub(crate) fn log_failure(
    collection: CollectionKind,
    record_id: &str,
    class: FailureClass,
    what: &str,
) {
    match class {
        FailureClass::Condition => {
            tracing::debug!(collection = %collection, record_id, "{what}: condition failure")
        }
        FailureClass::Transient => {
            tracing::debug!(collection = %collection, record_id, "{what}: transient failure")
        }
        FailureClass::Permanent => {
            tracing::warn!(collection = %collection, record_id, "{what}: rejected by remote")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryKv;
    use crate::remote::MemoryRemote;
    use fitsync_engine::Mutation;
    use serde_json::json;

    fn context() -> Arc<SyncContext> {
        SyncContext::new(
            SyncConfig::default(),
            Arc::new(MemoryRemote::new()),
            Arc::new(MemoryKv::new()),
        )
    }

    #[tokio::test]
    async fn persist_without_owner_is_noop() {
        let ctx = context();
        ctx.persist_collection(CollectionKind::Workouts).await.unwrap();
        ctx.persist_retry_queue().await.unwrap();
    }

    #[tokio::test]
    async fn persists_current_state() {
        let ctx = context();
        ctx.store.lock().set_owner(Some("u1".into()));
        ctx.store
            .lock()
            .apply(
                Mutation::insert(
                    "w-1",
                    CollectionKind::Workouts,
                    "u1",
                    json!({"name": "Push", "date": "2026-01-05"}),
                ),
                ctx.now(),
            )
            .unwrap();

        ctx.persist_collection(CollectionKind::Workouts).await.unwrap();
        let saved = ctx
            .persistence
            .load_collection("u1", CollectionKind::Workouts)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.active_record_count(), 1);
    }

    #[test]
    fn notices_without_subscribers_are_dropped() {
        let ctx = context();
        ctx.notify(SyncNotice::PassCompleted(PassReport::default()));

        let mut rx = ctx.notices();
        ctx.notify(SyncNotice::RetryStalled {
            collection: CollectionKind::Workouts,
            record_id: "w-1".into(),
            attempts: 20,
        });
        let notice = rx.try_recv().unwrap();
        assert!(notice.is_user_facing());
    }
}
