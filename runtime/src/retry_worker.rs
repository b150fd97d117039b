//! Background replay of the retry queue.
//!
//! A timer attempts the head of the queue once per interval. The task stops
//! itself when the queue drains and is restarted by the next enqueue.
//!
//! A replayed write sends the record as it is now. Entries whose record was
//! synced, tombstoned or purged since they were queued are dropped without
//! a remote call.

use crate::context::{SyncContext, SyncNotice};
use crate::error::Result;
use fitsync_engine::{CollectionKind, OpKind, RecordId, RemoteFailure, RetryEntry, Revision, Settled};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The queue was empty
    Idle,
    /// Skipped while disconnected
    Offline,
    Settled(Settled),
}

pub struct RetryWorker {
    ctx: Arc<SyncContext>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetryWorker {
    pub fn new(ctx: Arc<SyncContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            handle: Mutex::new(None),
        })
    }

    /// Append a failed write, persist the queue and make sure the timer runs.
    pub async fn enqueue(
        self: &Arc<Self>,
        kind: OpKind,
        collection: CollectionKind,
        record_id: RecordId,
        revision: Revision,
    ) -> Result<u64> {
        let seq = self.ctx.retry_queue.lock().push(
            kind,
            collection,
            record_id.clone(),
            revision,
            self.ctx.now(),
        );
        tracing::debug!(collection = %collection, record_id = %record_id, seq, ?kind, "write queued for retry");

        self.ctx.persist_retry_queue().await?;
        self.ensure_running();
        Ok(seq)
    }

    /// Start the timer unless it is already running or there is nothing to do.
    pub fn ensure_running(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if self.ctx.retry_queue.lock().is_empty() {
            *handle = None;
            return;
        }

        let worker = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { worker.run().await }));
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Abort the timer. Queued entries stay queued.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.ctx.config.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "retry tick failed");
            }

            // Checked under the handle lock so a concurrent enqueue either
            // sees this task running or starts a new one.
            let drained = {
                let mut handle = self.handle.lock();
                let drained = self.ctx.retry_queue.lock().is_empty();
                if drained {
                    *handle = None;
                }
                drained
            };
            if drained {
                tracing::info!("retry queue drained");
                break;
            }
        }
    }

    /// Attempt the head entry once.
    pub async fn tick(&self) -> Result<TickOutcome> {
        if !self.ctx.network.is_connected() {
            return Ok(TickOutcome::Offline);
        }
        let Some(head) = self.ctx.retry_queue.lock().head().cloned() else {
            return Ok(TickOutcome::Idle);
        };

        let attempt = self.attempt(&head).await;

        let settled = {
            let mut queue = self.ctx.retry_queue.lock();
            // Cleared (sign-out) while the attempt was in flight.
            if queue.head().map(|h| h.seq) != Some(head.seq) {
                return Ok(TickOutcome::Idle);
            }
            match &attempt {
                Some((_, result)) => queue.settle_head(result.clone(), self.ctx.config.retry_ceiling),
                None => queue.drop_head(),
            }
        };

        match &settled {
            Settled::Popped(entry) => {
                let revision = attempt.map_or(entry.revision, |(revision, _)| revision);
                self.fold_success(entry, revision);
                self.ctx.persist_collections(&[entry.collection]).await;
            }
            Settled::Superseded(entry) => {
                tracing::debug!(
                    collection = %entry.collection,
                    record_id = %entry.record_id,
                    seq = entry.seq,
                    "queued write superseded, dropping"
                );
            }
            Settled::Discarded(entry, failure) => {
                tracing::warn!(
                    collection = %entry.collection,
                    record_id = %entry.record_id,
                    error = %failure,
                    "queued write rejected, discarding"
                );
                self.ctx.notify(SyncNotice::Discarded {
                    collection: entry.collection,
                    record_id: entry.record_id.clone(),
                    reason: failure.to_string(),
                });
            }
            Settled::Kept {
                attempts,
                newly_stalled,
            } => {
                tracing::debug!(
                    collection = %head.collection,
                    record_id = %head.record_id,
                    attempts,
                    "queued write failed, keeping"
                );
                if *newly_stalled {
                    tracing::warn!(
                        collection = %head.collection,
                        record_id = %head.record_id,
                        attempts,
                        "queued write stalled"
                    );
                    self.ctx.notify(SyncNotice::RetryStalled {
                        collection: head.collection,
                        record_id: head.record_id.clone(),
                        attempts: *attempts,
                    });
                }
            }
            Settled::Empty => {}
        }

        self.ctx.persist_retry_queue().await?;
        Ok(TickOutcome::Settled(settled))
    }

    /// Replay an entry against the record's current state. `None` when
    /// the record no longer needs the write.
    async fn attempt(
        &self,
        entry: &RetryEntry,
    ) -> Option<(Revision, std::result::Result<(), RemoteFailure>)> {
        match entry.kind.first_step() {
            None => Some((
                entry.revision,
                self.ctx.delete_remote(entry.collection, &entry.record_id).await,
            )),
            Some(step) => self
                .ctx
                .write_pending(entry.collection, &entry.record_id, step)
                .await
                .map(|attempt| (attempt.revision, attempt.result)),
        }
    }

    fn fold_success(&self, entry: &RetryEntry, revision: Revision) {
        let mut store = self.ctx.store.lock();
        match entry.kind {
            OpKind::Delete => {
                store.purge(entry.collection, std::slice::from_ref(&entry.record_id));
            }
            OpKind::Create | OpKind::Update => {
                store.confirm_synced(entry.collection, &[(entry.record_id.clone(), revision)]);
            }
        }
    }
}

impl Drop for RetryWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
