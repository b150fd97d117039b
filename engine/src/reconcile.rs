//! Reconciliation planning for one collection.
//!
//! The engine cannot talk to the remote store, so a pass is split in three:
//! [`ReconcilePlan::build`] reads the work out of the store, the caller
//! performs the remote calls (driving [`UpsertStep`] for each unsynchronized
//! record), and [`commit`] folds every result back in with one batched purge
//! and one batched confirmation.
//!
//! # Algorithm
//!
//! 1. Deletions: one remote delete per tombstone. Success and `NotFound`
//!    both purge the tombstone; anything else keeps it for the next pass.
//! 2. Upserts: update first, create on a condition failure, and update once
//!    more if the create also hits a condition failure (another writer won
//!    the race). Non-condition failures end the protocol immediately.
//! 3. Confirmations carry the revision that was sent, so records edited
//!    while the pass was in flight stay unsynchronized.

use crate::{
    CollectionKind, FailureClass, Record, RecordId, RecordStore, RemoteFailure, RemoteRecord,
    Revision,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A tombstone to delete remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTask {
    pub id: RecordId,
}

/// An unsynchronized record to write remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertTask {
    pub id: RecordId,
    /// Revision captured when the plan was built
    pub revision: Revision,
    /// Wire representation to send
    pub record: RemoteRecord,
}

/// Work for one pass over one collection, captured from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePlan {
    pub collection: CollectionKind,
    pub deletions: Vec<DeleteTask>,
    pub upserts: Vec<UpsertTask>,
}

impl ReconcilePlan {
    /// Read the pending work of a collection. Tasks are sorted by id.
    pub fn build(store: &RecordStore, kind: CollectionKind) -> Self {
        let mut deletions = Vec::new();
        let mut upserts = Vec::new();

        if let Some(collection) = store.collection(kind) {
            deletions = collection
                .tombstoned()
                .map(|r| DeleteTask { id: r.id.clone() })
                .collect();
            upserts = collection.unsynced().map(UpsertTask::from).collect();
        }

        deletions.sort_by(|a, b| a.id.cmp(&b.id));
        upserts.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            collection: kind,
            deletions,
            upserts,
        }
    }

    /// Whether the pass has nothing to do.
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.upserts.is_empty()
    }
}

impl From<&Record> for UpsertTask {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            revision: record.revision,
            record: record.to_remote(),
        }
    }
}

/// What to do with a tombstone after its remote delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteDecision {
    Purge,
    Retain(FailureClass),
}

/// Classify a remote delete result. `NotFound` counts as success.
pub fn classify_delete(result: &Result<(), RemoteFailure>) -> DeleteDecision {
    match result {
        Ok(()) | Err(RemoteFailure::NotFound) => DeleteDecision::Purge,
        Err(failure) => DeleteDecision::Retain(failure.class()),
    }
}

/// One step of the update/create/retry-update protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsertStep {
    Update,
    Create,
    RetryUpdate,
}

/// Where the protocol goes after a step's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    Confirmed,
    Next(UpsertStep),
    Failed(RemoteFailure),
}

impl UpsertStep {
    /// Whether this step issues a remote update (otherwise a create).
    pub fn is_update(self) -> bool {
        matches!(self, UpsertStep::Update | UpsertStep::RetryUpdate)
    }

    /// Advance the protocol.
    ///
    /// Only condition failures move to the next step; every other failure
    /// ends the attempt for this pass.
    pub fn after(self, result: Result<(), &RemoteFailure>) -> StepDecision {
        let failure = match result {
            Ok(()) => return StepDecision::Confirmed,
            Err(failure) => failure,
        };

        if failure.class() != FailureClass::Condition {
            return StepDecision::Failed(failure.clone());
        }

        match self {
            UpsertStep::Update => StepDecision::Next(UpsertStep::Create),
            UpsertStep::Create => StepDecision::Next(UpsertStep::RetryUpdate),
            UpsertStep::RetryUpdate => StepDecision::Failed(failure.clone()),
        }
    }
}

/// Outcome of one remote delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub id: RecordId,
    pub result: Result<(), RemoteFailure>,
}

/// Outcome of one record's upsert protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub id: RecordId,
    pub revision: Revision,
    pub result: Result<(), RemoteFailure>,
    /// Remote calls the protocol made
    pub calls: usize,
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub collection: Option<CollectionKind>,
    /// Tombstones removed after a confirmed delete
    pub purged: Vec<RecordId>,
    /// Tombstones kept for a later pass
    pub retained: Vec<(RecordId, FailureClass)>,
    /// Records flipped to `synced=true`
    pub confirmed: Vec<RecordId>,
    /// Written remotely but edited locally meanwhile
    pub superseded: Vec<RecordId>,
    /// Records whose upsert failed this pass
    pub failed: Vec<(RecordId, FailureClass)>,
    pub remote_calls: usize,
}

impl PassReport {
    /// No failures were recorded.
    pub fn is_clean(&self) -> bool {
        self.retained.is_empty() && self.failed.is_empty()
    }

    /// Failures no retry can fix.
    pub fn permanent_failures(&self) -> impl Iterator<Item = &RecordId> {
        self.retained
            .iter()
            .chain(self.failed.iter())
            .filter(|(_, class)| *class == FailureClass::Permanent)
            .map(|(id, _)| id)
    }
}

/// Fold a pass's remote results into the store.
///
/// Purges and confirmations are applied as one batch each, so subscribers
/// see at most two events per pass.
pub fn commit(
    store: &mut RecordStore,
    kind: CollectionKind,
    deletes: Vec<DeleteResult>,
    upserts: Vec<UpsertResult>,
) -> PassReport {
    let mut report = PassReport {
        collection: Some(kind),
        remote_calls: deletes.len() + upserts.iter().map(|u| u.calls).sum::<usize>(),
        ..PassReport::default()
    };

    let mut purge = Vec::new();
    for delete in deletes {
        match classify_delete(&delete.result) {
            DeleteDecision::Purge => purge.push(delete.id),
            DeleteDecision::Retain(class) => report.retained.push((delete.id, class)),
        }
    }

    let mut confirmations = Vec::new();
    for upsert in upserts {
        match upsert.result {
            Ok(()) => confirmations.push((upsert.id, upsert.revision)),
            Err(failure) => report.failed.push((upsert.id, failure.class())),
        }
    }

    report.purged = store.purge(kind, &purge);
    report.confirmed = store.confirm_synced(kind, &confirmations);

    let confirmed: HashSet<&RecordId> = report.confirmed.iter().collect();
    report.superseded = confirmations
        .iter()
        .filter(|(id, _)| !confirmed.contains(id))
        .map(|(id, _)| id.clone())
        .collect();

    report
}
