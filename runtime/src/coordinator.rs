//! Decides when reconciliation passes run.
//!
//! A pass for a collection is triggered by a local change that leaves
//! unsynchronized records behind, by sign-in, and by reconnecting. At most
//! one pass per collection is in flight; triggers arriving meanwhile are
//! coalesced into a single rerun. Passes with retryable failures schedule a
//! follow-up with capped exponential backoff.

use crate::context::{SyncContext, SyncNotice};
use crate::error::{Result, SyncError};
use crate::mutations::Mutations;
use crate::network::{Subscription, TcpProbe};
use crate::reconciler;
use crate::retry_worker::RetryWorker;
use dashmap::DashMap;
use fitsync_engine::{
    CollectionKind, FailureClass, ListenerId, Origin, OwnerId, PassReport, RecordId, StoreChange,
    StoreEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Guard {
    in_flight: bool,
    rerun: bool,
    /// Consecutive passes with retryable failures
    failures: u32,
    follow_up: Option<JoinHandle<()>>,
}

/// What to do after a pass finished.
enum AfterPass {
    Rerun,
    Done,
    /// The owner changed while the pass ran
    Stale,
}

struct Inner {
    ctx: Arc<SyncContext>,
    retry: Arc<RetryWorker>,
    guards: DashMap<CollectionKind, Guard>,
    /// Bumped on every sign-in and sign-out so passes of the previous
    /// session stop touching guards
    generation: AtomicU64,
    idle: Notify,
    session: tokio::sync::Mutex<()>,
}

impl Inner {
    /// Start a pass unless one is in flight. Returns whether one started.
    fn trigger(self: &Arc<Self>, kind: CollectionKind) -> bool {
        if !self.ctx.network.is_connected() {
            tracing::trace!(collection = %kind, "offline, skipping pass");
            return false;
        }
        if self.ctx.owner_id().is_none() {
            return false;
        }

        {
            let mut guard = self.guards.entry(kind).or_default();
            if guard.in_flight {
                guard.rerun = true;
                tracing::debug!(collection = %kind, "pass in flight, coalescing trigger");
                return false;
            }
            guard.in_flight = true;
            if let Some(follow_up) = guard.follow_up.take() {
                follow_up.abort();
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_passes(kind, generation).await });
        true
    }

    fn trigger_all(self: &Arc<Self>) {
        for kind in CollectionKind::ALL {
            self.trigger(kind);
        }
    }

    async fn run_passes(self: Arc<Self>, kind: CollectionKind, generation: u64) {
        loop {
            let retryable = match reconciler::run_pass(&self.ctx, kind).await {
                Ok(report) => {
                    let retryable = has_retryable_failures(&report);
                    if report.remote_calls > 0 {
                        self.ctx.notify(SyncNotice::PassCompleted(report));
                    }
                    retryable
                }
                Err(e) => {
                    tracing::warn!(collection = %kind, error = %e, "reconcile pass failed");
                    true
                }
            };

            match self.after_pass(kind, generation, retryable) {
                AfterPass::Rerun => continue,
                AfterPass::Done | AfterPass::Stale => break,
            }
        }
        self.idle.notify_waiters();
    }

    fn after_pass(self: &Arc<Self>, kind: CollectionKind, generation: u64, retryable: bool) -> AfterPass {
        if self.generation.load(Ordering::SeqCst) != generation {
            return AfterPass::Stale;
        }

        let mut guard = self.guards.entry(kind).or_default();
        if retryable {
            guard.failures += 1;
        } else {
            guard.failures = 0;
        }

        if guard.rerun {
            guard.rerun = false;
            return AfterPass::Rerun;
        }
        guard.in_flight = false;

        if retryable && self.ctx.network.is_connected() {
            let delay = self.ctx.config.backoff().delay_for(guard.failures);
            tracing::debug!(collection = %kind, attempt = guard.failures, delay_ms = delay, "scheduling follow-up pass");

            let inner = Arc::clone(self);
            guard.follow_up = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if let Some(mut guard) = inner.guards.get_mut(&kind) {
                    guard.follow_up = None;
                }
                inner.trigger(kind);
            }));
        }
        AfterPass::Done
    }

    fn is_idle(&self, kind: CollectionKind) -> bool {
        self.guards.get(&kind).map_or(true, |g| !g.in_flight)
    }

    /// Forget the current session's in-memory sync state.
    fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.retry.stop();
        self.ctx.retry_queue.lock().clear();
        for mut guard in self.guards.iter_mut() {
            if let Some(follow_up) = guard.follow_up.take() {
                follow_up.abort();
            }
        }
        self.guards.clear();
        self.idle.notify_waiters();
    }

    async fn sign_in(self: &Arc<Self>, owner: OwnerId) -> Result<()> {
        let _session = self.session.lock().await;
        if self.ctx.owner_id().as_ref() == Some(&owner) {
            return Ok(());
        }

        let snapshots = self.ctx.persistence.load_all(&owner).await?;
        let queue = self.ctx.persistence.load_retry_queue(&owner).await?;

        self.reset();
        let restored = {
            let mut store = self.ctx.store.lock();
            store.set_owner(Some(owner.clone()));
            let mut restored = 0;
            for snapshot in snapshots {
                let kind = snapshot.collection;
                match store.import_collection(snapshot) {
                    Ok(()) => restored += 1,
                    Err(e) => {
                        tracing::warn!(collection = %kind, error = %e, "discarding unreadable snapshot")
                    }
                }
            }
            restored
        };
        let queued = queue.len();
        *self.ctx.retry_queue.lock() = queue;

        tracing::info!(owner_id = %owner, restored, queued, "signed in");
        self.trigger_all();
        self.retry.ensure_running();
        Ok(())
    }

    async fn sign_out(&self) {
        let _session = self.session.lock().await;
        if self.ctx.owner_id().is_none() {
            return;
        }
        self.reset();
        self.ctx.store.lock().set_owner(None);
        tracing::info!("signed out");
    }
}

/// Whether a pass left failures a later pass may fix.
fn has_retryable_failures(report: &PassReport) -> bool {
    report
        .retained
        .iter()
        .chain(report.failed.iter())
        .any(|(_, class)| *class != FailureClass::Permanent)
}

/// Owns the background tasks that keep the store in sync.
pub struct SyncCoordinator {
    inner: Arc<Inner>,
    mutations: Mutations,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    network_subscription: Mutex<Option<Subscription>>,
    listener: Mutex<Option<ListenerId>>,
}

impl SyncCoordinator {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let retry = RetryWorker::new(ctx.clone());
        let mutations = Mutations::new(ctx.clone(), retry.clone());
        Self {
            inner: Arc::new(Inner {
                ctx,
                retry,
                guards: DashMap::new(),
                generation: AtomicU64::new(0),
                idle: Notify::new(),
                session: tokio::sync::Mutex::new(()),
            }),
            mutations,
            tasks: Mutex::new(Vec::new()),
            network_subscription: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Start listening for store, identity and connectivity changes.
    ///
    /// Signs in right away if the identity already has an owner. Must be
    /// called inside a tokio runtime.
    pub fn start(&self) {
        let ctx = &self.inner.ctx;
        let mut tasks = self.tasks.lock();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = ctx.store.lock().subscribe(Box::new(move |event: &StoreEvent| {
            if event.origin == Origin::Local && matches!(event.change, StoreChange::Upserted(_)) {
                let _ = tx.send(event.collection);
            }
        }));
        *self.listener.lock() = Some(listener);

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            while let Some(kind) = rx.recv().await {
                let pending = inner.ctx.store.lock().needs_sync(kind);
                if pending {
                    inner.trigger(kind);
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        let mut identity = ctx.identity.subscribe();
        tasks.push(tokio::spawn(async move {
            let initial = identity.borrow_and_update().clone();
            let mut owner = initial;
            loop {
                match owner {
                    Some(id) => {
                        if let Err(e) = inner.sign_in(id).await {
                            tracing::warn!(error = %e, "sign-in failed");
                        }
                    }
                    None => inner.sign_out().await,
                }
                if identity.changed().await.is_err() {
                    break;
                }
                owner = identity.borrow_and_update().clone();
            }
        }));

        let inner = Arc::clone(&self.inner);
        let subscription = ctx.network.on_change(move |connected| {
            let inner = Arc::clone(&inner);
            async move {
                if connected {
                    tracing::info!("reconnected, syncing all collections");
                    inner.trigger_all();
                    inner.retry.ensure_running();
                }
            }
        });
        *self.network_subscription.lock() = Some(subscription);

        if let Some(addr) = &ctx.config.probe_addr {
            tracing::info!(addr = %addr, "starting connectivity probe");
            let probe = TcpProbe::new(addr.clone(), ctx.config.probe_interval, ctx.config.probe_timeout);
            tasks.push(probe.spawn(ctx.network.clone()));
        }
    }

    /// Stop every background task. Local state is left as is.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.network_subscription.lock().take();
        if let Some(listener) = self.listener.lock().take() {
            self.inner.ctx.store.lock().unsubscribe(listener);
        }
        self.inner.retry.stop();
        for mut guard in self.inner.guards.iter_mut() {
            if let Some(follow_up) = guard.follow_up.take() {
                follow_up.abort();
            }
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.inner.ctx
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub fn retry_worker(&self) -> &Arc<RetryWorker> {
        &self.inner.retry
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.ctx.notices()
    }

    /// Sign in, restore the owner's persisted state and sync everything.
    pub async fn sign_in(&self, owner_id: impl Into<OwnerId>) -> Result<()> {
        let owner_id = owner_id.into();
        self.inner.ctx.identity.sign_in(owner_id.clone());
        self.inner.sign_in(owner_id).await
    }

    /// Sign out and clear all in-memory state. Persisted state is kept.
    pub async fn sign_out(&self) {
        self.inner.ctx.identity.sign_out();
        self.inner.sign_out().await;
    }

    /// Request a pass. Returns false if it was skipped or coalesced.
    pub fn trigger(&self, kind: CollectionKind) -> bool {
        self.inner.trigger(kind)
    }

    pub fn is_idle(&self, kind: CollectionKind) -> bool {
        self.inner.is_idle(kind)
    }

    /// Run a pass now and wait for it and any coalesced rerun.
    pub async fn sync_now(&self, kind: CollectionKind) -> Result<()> {
        if !self.inner.ctx.network.is_connected() {
            return Err(SyncError::Offline);
        }
        if self.inner.ctx.owner_id().is_none() {
            return Err(SyncError::OwnerMissing);
        }

        self.inner.trigger(kind);
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle(kind) {
                return Ok(());
            }
            notified.await;
        }
    }

    /// Fetch the owner's records of one collection from the remote store.
    ///
    /// Records with pending local writes keep their local state. Returns the
    /// ids that changed.
    pub async fn pull(&self, kind: CollectionKind) -> Result<Vec<RecordId>> {
        let ctx = &self.inner.ctx;
        if !ctx.network.is_connected() {
            return Err(SyncError::Offline);
        }
        let owner = ctx.owner_id().ok_or(SyncError::OwnerMissing)?;

        let records = ctx
            .remote
            .list(kind, &owner)
            .await
            .map_err(SyncError::Remote)?;
        let listed = records.len();

        let merged = {
            let mut store = ctx.store.lock();
            if store.owner_id() != Some(&owner) {
                return Err(SyncError::OwnerMissing);
            }
            store.merge_remote(kind, records)?
        };
        if !merged.is_empty() {
            ctx.persist_collection(kind).await?;
        }

        tracing::debug!(collection = %kind, listed, merged = merged.len(), "pulled remote records");
        Ok(merged)
    }

    /// Pull every collection. Returns how many records changed.
    pub async fn pull_all(&self) -> Result<usize> {
        let mut changed = 0;
        for kind in CollectionKind::ALL {
            changed += self.pull(kind).await?.len();
        }
        Ok(changed)
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
