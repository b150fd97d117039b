//! Retry queue for remote writes that failed when a mutation was made.
//!
//! The queue is strict FIFO: only the head is ever attempted, and it stays at
//! the head until it succeeds or fails permanently. Later entries for the
//! same record therefore never overtake earlier ones.
//!
//! Entries name a record rather than carry a copy of it. A replay sends the
//! record's state at replay time, so an older entry can never overwrite a
//! newer remote value; an entry whose record was synced or deleted in the
//! meantime is dropped as superseded.

use crate::{CollectionKind, FailureClass, RecordId, RemoteFailure, Revision, Timestamp, UpsertStep};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Remote operation an entry replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    /// First protocol step for a write, `None` for deletes.
    pub fn first_step(self) -> Option<UpsertStep> {
        match self {
            OpKind::Create => Some(UpsertStep::Create),
            OpKind::Update => Some(UpsertStep::Update),
            OpKind::Delete => None,
        }
    }
}

/// A queued remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEntry {
    /// Position assigned on enqueue, strictly increasing
    pub seq: u64,
    pub kind: OpKind,
    pub collection: CollectionKind,
    pub record_id: RecordId,
    /// Record revision when the entry was enqueued
    pub revision: Revision,
    pub enqueued_at: Timestamp,
    pub attempts: u32,
    /// Stalled notice already emitted
    #[serde(default)]
    pub stalled: bool,
}

/// How the head entry was settled after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    /// Succeeded and removed
    Popped(RetryEntry),
    /// Failed permanently and removed
    Discarded(RetryEntry, RemoteFailure),
    /// Removed without an attempt; its record no longer needs the write
    Superseded(RetryEntry),
    /// Failed transiently and kept at the head
    Kept {
        attempts: u32,
        /// The attempt counter just crossed the stall ceiling
        newly_stalled: bool,
    },
    /// The queue was empty
    Empty,
}

/// Persisted FIFO of failed mutation writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueue {
    next_seq: u64,
    entries: VecDeque<RetryEntry>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its sequence number.
    pub fn push(
        &mut self,
        kind: OpKind,
        collection: CollectionKind,
        record_id: impl Into<RecordId>,
        revision: Revision,
        enqueued_at: Timestamp,
    ) -> u64 {
        self.next_seq += 1;
        self.entries.push_back(RetryEntry {
            seq: self.next_seq,
            kind,
            collection,
            record_id: record_id.into(),
            revision,
            enqueued_at,
            attempts: 0,
            stalled: false,
        });
        self.next_seq
    }

    /// The only entry eligible for an attempt.
    pub fn head(&self) -> Option<&RetryEntry> {
        self.entries.front()
    }

    /// Whether a write for this record is waiting. Later writes for the
    /// record must queue behind it.
    pub fn contains(&self, collection: CollectionKind, record_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.collection == collection && e.record_id == record_id)
    }

    /// Remove the head without attempting it.
    pub fn drop_head(&mut self) -> Settled {
        match self.entries.pop_front() {
            Some(entry) => Settled::Superseded(entry),
            None => Settled::Empty,
        }
    }

    /// Settle the head after an attempt.
    ///
    /// Permanent failures drop the entry; transient and condition failures
    /// keep it and count the attempt. `stall_ceiling` of zero disables
    /// stall detection.
    pub fn settle_head(
        &mut self,
        result: Result<(), RemoteFailure>,
        stall_ceiling: u32,
    ) -> Settled {
        let failure = match result {
            Ok(()) => {
                return match self.entries.pop_front() {
                    Some(entry) => Settled::Popped(entry),
                    None => Settled::Empty,
                }
            }
            Err(failure) => failure,
        };

        if failure.class() == FailureClass::Permanent {
            return match self.entries.pop_front() {
                Some(entry) => Settled::Discarded(entry, failure),
                None => Settled::Empty,
            };
        }

        match self.entries.front_mut() {
            Some(head) => {
                head.attempts += 1;
                let newly_stalled =
                    stall_ceiling > 0 && head.attempts >= stall_ceiling && !head.stalled;
                if newly_stalled {
                    head.stalled = true;
                }
                Settled::Kept {
                    attempts: head.attempts,
                    newly_stalled,
                }
            }
            None => Settled::Empty,
        }
    }

    /// Drop every entry, e.g. on sign-out.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetryEntry> {
        self.entries.iter()
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before follow-up number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(2_000, 300_000)
    }
}
