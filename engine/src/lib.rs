//! # FitSync Engine
//!
//! The deterministic core of FitSync's offline-first sync.
//!
//! This crate holds the local record store and the pure parts of the sync
//! protocol: which records need remote work, how a remote result moves a
//! record through the update/create/retry-update protocol, and how results
//! are folded back into the store. It performs no IO; the `fitsync-runtime`
//! crate drives it against a remote store and local persistence.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Optimistic**: Local writes are visible immediately, marked unsynced
//! - **Portable**: Runs anywhere Rust runs, and behind a C ABI
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Every entity is a [`Record`] in one of the fixed [`CollectionKind`]s:
//! - Client-generated id and owner id
//! - JSON payload validated by the [`Schema`]
//! - `synced` flag: the remote store has confirmed the current revision
//! - `deleted` flag: a tombstone waiting for a confirmed remote delete
//! - `revision`: bumped on every local change, so late confirmations of an
//!   older revision are ignored
//!
//! ### Mutations
//!
//! Local changes are expressed as [`Mutation`]s:
//! - [`InsertOp`] - Create a record (children are appended to their parent)
//! - [`PatchOp`] - Merge fields into a record
//! - [`TombstoneOp`] - Tombstone a record and its children
//! - [`ReorderOp`] - Renumber the children of a parent
//!
//! ### Reconciliation
//!
//! A [`ReconcilePlan`] lists the tombstones to delete and the unsynced
//! records to write. The caller drives each write with [`UpsertStep`] and
//! hands the results to [`reconcile::commit`], which purges and confirms in
//! one batch each and returns a [`PassReport`].
//!
//! ### Retry Queue
//!
//! Writes that fail when a mutation is made go to the [`RetryQueue`], a
//! strict FIFO of which only the head is ever attempted.
//! Entries name a record rather than copy it, so a replay always sends the
//! record's current state; [`RecordStore::pending_write`] says what that is.
//!
//! ## Quick Start
//!
//! ```rust
//! use fitsync_engine::{
//!     reconcile, CollectionKind, Mutation, ReconcilePlan, RecordStore, Schema, UpsertResult,
//! };
//! use serde_json::json;
//!
//! // 1. Create a store and sign an owner in
//! let mut store = RecordStore::with_owner(Schema::fitness(), "owner-1");
//!
//! // 2. Apply a mutation - visible at once, not yet synced
//! let op = Mutation::insert(
//!     "n-1",
//!     CollectionKind::NutritionEntries,
//!     "owner-1",
//!     json!({"name": "Banana", "calories": 105, "protein": 1, "carbs": 27, "fats": 0}),
//! );
//! store.apply(op, 1706745600000).unwrap();
//! assert!(!store.get(CollectionKind::NutritionEntries, "n-1").unwrap().synced);
//!
//! // 3. Plan a pass and report the remote results back
//! let plan = ReconcilePlan::build(&store, CollectionKind::NutritionEntries);
//! let results = plan
//!     .upserts
//!     .iter()
//!     .map(|task| UpsertResult {
//!         id: task.id.clone(),
//!         revision: task.revision,
//!         result: Ok(()),
//!         calls: 1,
//!     })
//!     .collect();
//! let report = reconcile::commit(&mut store, CollectionKind::NutritionEntries, vec![], results);
//!
//! assert_eq!(report.confirmed, vec!["n-1".to_string()]);
//! assert!(store.get(CollectionKind::NutritionEntries, "n-1").unwrap().synced);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for mobile hosts.
//! All data is exchanged as JSON strings.
//!
//! ## Persistence
//!
//! Use [`RecordStore::export_collection`] and
//! [`RecordStore::import_collection`] with [`CollectionSnapshot`]. Snapshots
//! serialize to JSON with deterministic ordering.

pub mod collection;
pub mod entity;
pub mod error;
pub mod ffi;
pub mod mutation;
pub mod outcome;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use collection::CollectionKind;
pub use entity::{
    Entity, Exercise, ExerciseLog, MacroTotals, NutritionEntry, Settings, UserExercise,
    WeightUnit, Workout,
};
pub use error::Error;
pub use mutation::{InsertOp, Mutation, PatchOp, ReorderOp, TombstoneOp};
pub use outcome::{FailureClass, MutationOutcome, RejectReason, RemoteFailure};
pub use reconcile::{
    classify_delete, DeleteDecision, DeleteResult, DeleteTask, PassReport, ReconcilePlan,
    StepDecision, UpsertResult, UpsertStep, UpsertTask,
};
pub use record::{Origin, Record, RemoteRecord};
pub use retry::{Backoff, OpKind, RetryEntry, RetryQueue, Settled};
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema, SCHEMA_VERSION};
pub use snapshot::{CollectionSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{
    ApplyResult, Collection, CollectionSummary, Listener, ListenerId, QueryBuilder, RecordStore,
    StoreChange, StoreEvent, TouchedRecord,
};

/// Type aliases for clarity
pub type RecordId = String;
pub type OwnerId = String;
pub type Revision = u64;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
