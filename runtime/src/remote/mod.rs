//! The remote store the device syncs with.
//!
//! The remote API itself lives outside this crate; hosts implement
//! [`RemoteStore`] over whatever transport they use.

mod memory;

pub use memory::{MemoryRemote, RemoteCall, RemoteOp};

use async_trait::async_trait;
use fitsync_engine::{
    CollectionKind, RemoteFailure, RemoteRecord, Revision, StepDecision, UpsertStep,
};

/// Remote collection operations.
///
/// `create` fails with [`RemoteFailure::ConditionFailed`] if the record
/// already exists; `update` does if it does not. `delete` reports a missing
/// record as [`RemoteFailure::NotFound`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, record: &RemoteRecord) -> Result<RemoteRecord, RemoteFailure>;

    async fn update(&self, record: &RemoteRecord) -> Result<RemoteRecord, RemoteFailure>;

    async fn delete(&self, collection: CollectionKind, id: &str) -> Result<(), RemoteFailure>;

    /// Every record the owner has in a collection.
    async fn list(
        &self,
        collection: CollectionKind,
        owner_id: &str,
    ) -> Result<Vec<RemoteRecord>, RemoteFailure>;
}

/// Result of writing one record's current state.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAttempt {
    /// Revision that was sent; the one to confirm on success
    pub revision: Revision,
    pub result: Result<(), RemoteFailure>,
    pub calls: usize,
}

/// Write a record through the update/create/retry-update protocol.
///
/// Returns the final result and how many remote calls were made.
pub async fn write_record(
    remote: &dyn RemoteStore,
    record: &RemoteRecord,
    start: UpsertStep,
) -> (Result<(), RemoteFailure>, usize) {
    let mut step = start;
    let mut calls = 0;

    loop {
        calls += 1;
        let result = if step.is_update() {
            remote.update(record).await
        } else {
            remote.create(record).await
        };

        match step.after(result.as_ref().map(|_| ())) {
            StepDecision::Confirmed => return (Ok(()), calls),
            StepDecision::Next(next) => {
                tracing::trace!(
                    collection = %record.collection,
                    record_id = %record.id,
                    ?next,
                    "condition failure, falling back"
                );
                step = next;
            }
            StepDecision::Failed(failure) => return (Err(failure), calls),
        }
    }
}

/// Delete a record, treating an already-missing record as deleted.
pub async fn delete_record(
    remote: &dyn RemoteStore,
    collection: CollectionKind,
    id: &str,
) -> Result<(), RemoteFailure> {
    match remote.delete(collection, id).await {
        Err(RemoteFailure::NotFound) => {
            tracing::trace!(collection = %collection, record_id = %id, "already deleted remotely");
            Ok(())
        }
        result => result,
    }
}
