//! User-facing mutation functions.
//!
//! Every function applies its change to the store first, so it is visible
//! immediately, and then attempts the matching remote write. The result says
//! what happened instead of failing:
//!
//! - [`MutationOutcome::Applied`]: written locally and remotely.
//! - [`MutationOutcome::Queued`]: written locally; the remote write is in the
//!   retry queue, because of a transient failure, because the device is
//!   offline, or behind an earlier queued write of the same record.
//! - [`MutationOutcome::Rejected`]: nobody signed in, the change failed
//!   validation, the remote store refused it, or it was reverted.
//!
//! Failed adds, edits and deletes keep the local change by default. Edit
//! functions revert instead when called through
//! `with_policy(EditPolicy::RevertOnFailure)`; offline, such edits are
//! refused up front rather than queued.

use crate::context::{log_failure, SyncContext};
use crate::retry_worker::RetryWorker;
use chrono::NaiveDate;
use fitsync_engine::{
    CollectionKind, Entity, Error, FailureClass, Mutation, MutationOutcome, NutritionEntry,
    OpKind, RecordId, RejectReason, RemoteFailure, Revision, Settings,
};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// What to do when an edit's remote write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditPolicy {
    /// Keep the new value and retry later
    #[default]
    RetryOnFailure,
    /// Restore the previous value and report the failure. Offline edits
    /// are refused without touching the record.
    RevertOnFailure,
    /// Refuse the change while offline
    RequireConnection,
}

/// Result of an add: the new record's id and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: RecordId,
    pub outcome: MutationOutcome,
}

/// One remote write derived from a touched record.
#[derive(Debug, Clone)]
struct PendingWrite {
    kind: OpKind,
    collection: CollectionKind,
    id: RecordId,
    revision: Revision,
}

#[derive(Clone)]
pub struct Mutations {
    ctx: Arc<SyncContext>,
    retry: Arc<RetryWorker>,
    policy: EditPolicy,
}

impl Mutations {
    pub fn new(ctx: Arc<SyncContext>, retry: Arc<RetryWorker>) -> Self {
        Self {
            ctx,
            retry,
            policy: EditPolicy::default(),
        }
    }

    /// The same functions with a different edit policy.
    ///
    /// `RevertOnFailure` only changes edits; adds and deletes always keep
    /// the local change. `RequireConnection` applies to everything.
    pub fn with_policy(&self, policy: EditPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn policy(&self) -> EditPolicy {
        self.policy
    }

    // Workouts

    pub async fn add_workout(&self, name: &str, date: NaiveDate) -> Created {
        let payload = json!({
            "name": name,
            "date": date.format(DATE_FORMAT).to_string(),
            "archived": false,
        });
        self.add(CollectionKind::Workouts, payload).await
    }

    pub async fn rename_workout(&self, id: &str, name: &str) -> MutationOutcome {
        self.edit(CollectionKind::Workouts, id, fields([("name", json!(name))]))
            .await
    }

    /// Set or clear a workout's notes.
    pub async fn annotate_workout(&self, id: &str, notes: Option<&str>) -> MutationOutcome {
        self.edit(CollectionKind::Workouts, id, fields([("notes", json!(notes))]))
            .await
    }

    pub async fn archive_workout(&self, id: &str, archived: bool) -> MutationOutcome {
        self.edit(
            CollectionKind::Workouts,
            id,
            fields([("archived", json!(archived))]),
        )
        .await
    }

    /// Delete a workout with its exercises and their logs.
    pub async fn delete_workout(&self, id: &str) -> MutationOutcome {
        self.delete(CollectionKind::Workouts, id).await
    }

    // Exercises

    /// Append an exercise to a workout.
    pub async fn add_exercise(
        &self,
        workout_id: &str,
        name: &str,
        user_exercise_id: Option<&str>,
    ) -> Created {
        let mut payload = json!({"workoutId": workout_id, "name": name});
        if let (Some(user_exercise_id), Value::Object(obj)) = (user_exercise_id, &mut payload) {
            obj.insert("userExerciseId".into(), json!(user_exercise_id));
        }
        self.add(CollectionKind::Exercises, payload).await
    }

    pub async fn rename_exercise(&self, id: &str, name: &str) -> MutationOutcome {
        self.edit(CollectionKind::Exercises, id, fields([("name", json!(name))]))
            .await
    }

    /// Renumber a workout's exercises. `ordered_ids` must list every one.
    pub async fn reorder_exercises(
        &self,
        workout_id: &str,
        ordered_ids: Vec<RecordId>,
    ) -> MutationOutcome {
        self.run(
            Mutation::reorder(CollectionKind::Exercises, workout_id, ordered_ids),
            None,
        )
        .await
    }

    /// Delete an exercise with its logs. Later exercises move up.
    pub async fn delete_exercise(&self, id: &str) -> MutationOutcome {
        self.delete(CollectionKind::Exercises, id).await
    }

    // Exercise logs

    pub async fn add_log(&self, exercise_id: &str, weight: f64, reps: u32) -> Created {
        let payload = json!({"exerciseId": exercise_id, "weight": weight, "reps": reps});
        self.add(CollectionKind::ExerciseLogs, payload).await
    }

    pub async fn edit_log(&self, id: &str, weight: f64, reps: u32) -> MutationOutcome {
        self.edit(
            CollectionKind::ExerciseLogs,
            id,
            fields([("weight", json!(weight)), ("reps", json!(reps))]),
        )
        .await
    }

    pub async fn annotate_log(&self, id: &str, notes: Option<&str>) -> MutationOutcome {
        self.edit(
            CollectionKind::ExerciseLogs,
            id,
            fields([("notes", json!(notes))]),
        )
        .await
    }

    pub async fn reorder_logs(
        &self,
        exercise_id: &str,
        ordered_ids: Vec<RecordId>,
    ) -> MutationOutcome {
        self.run(
            Mutation::reorder(CollectionKind::ExerciseLogs, exercise_id, ordered_ids),
            None,
        )
        .await
    }

    pub async fn delete_log(&self, id: &str) -> MutationOutcome {
        self.delete(CollectionKind::ExerciseLogs, id).await
    }

    // User exercises

    pub async fn add_user_exercise(&self, name: &str, muscle_group: Option<&str>) -> Created {
        let mut payload = json!({"name": name, "archived": false});
        if let (Some(group), Value::Object(obj)) = (muscle_group, &mut payload) {
            obj.insert("muscleGroup".into(), json!(group));
        }
        self.add(CollectionKind::UserExercises, payload).await
    }

    pub async fn rename_user_exercise(&self, id: &str, name: &str) -> MutationOutcome {
        self.edit(
            CollectionKind::UserExercises,
            id,
            fields([("name", json!(name))]),
        )
        .await
    }

    pub async fn archive_user_exercise(&self, id: &str, archived: bool) -> MutationOutcome {
        self.edit(
            CollectionKind::UserExercises,
            id,
            fields([("archived", json!(archived))]),
        )
        .await
    }

    pub async fn delete_user_exercise(&self, id: &str) -> MutationOutcome {
        self.delete(CollectionKind::UserExercises, id).await
    }

    // Nutrition

    pub async fn add_nutrition_entry(&self, entry: &NutritionEntry) -> Created {
        if let Err(reason) = check_date(entry.date.as_deref()) {
            return Created {
                id: String::new(),
                outcome: MutationOutcome::Rejected(reason),
            };
        }
        match entry.to_payload() {
            Ok(payload) => self.add(CollectionKind::NutritionEntries, payload).await,
            Err(e) => Created {
                id: String::new(),
                outcome: MutationOutcome::Rejected(RejectReason::Validation(e.to_string())),
            },
        }
    }

    /// Replace every field of a nutrition entry.
    pub async fn edit_nutrition_entry(&self, id: &str, entry: &NutritionEntry) -> MutationOutcome {
        if let Err(reason) = check_date(entry.date.as_deref()) {
            return MutationOutcome::Rejected(reason);
        }
        let mut patch = match entry.to_payload() {
            Ok(Value::Object(obj)) => obj,
            Ok(_) => return MutationOutcome::Rejected(RejectReason::Validation(
                "nutrition entry must serialize to an object".into(),
            )),
            Err(e) => return MutationOutcome::Rejected(RejectReason::Validation(e.to_string())),
        };
        patch.entry("date").or_insert(Value::Null);
        self.edit(CollectionKind::NutritionEntries, id, patch).await
    }

    pub async fn delete_nutrition_entry(&self, id: &str) -> MutationOutcome {
        self.delete(CollectionKind::NutritionEntries, id).await
    }

    // Settings

    /// Write the owner's settings, creating the record on first use.
    ///
    /// Unset optional goals leave the stored values alone.
    pub async fn update_settings(&self, settings: &Settings) -> MutationOutcome {
        let Some(owner) = self.ctx.owner_id() else {
            return MutationOutcome::Rejected(RejectReason::OwnerMissing);
        };
        let payload = match settings.to_payload() {
            Ok(payload) => payload,
            Err(e) => return MutationOutcome::Rejected(RejectReason::Validation(e.to_string())),
        };

        let exists = self
            .ctx
            .store
            .lock()
            .get(Settings::COLLECTION, &owner)
            .is_some();
        if exists {
            let Value::Object(patch) = payload else {
                return MutationOutcome::Rejected(RejectReason::Validation(
                    "settings must serialize to an object".into(),
                ));
            };
            self.edit(Settings::COLLECTION, &owner, patch).await
        } else {
            self.run(
                Mutation::insert(owner.clone(), Settings::COLLECTION, owner, payload),
                None,
            )
            .await
        }
    }

    async fn add(&self, collection: CollectionKind, payload: Value) -> Created {
        let id = Uuid::new_v4().to_string();
        let Some(owner) = self.ctx.owner_id() else {
            return Created {
                id,
                outcome: MutationOutcome::Rejected(RejectReason::OwnerMissing),
            };
        };
        let outcome = self
            .run(Mutation::insert(id.clone(), collection, owner, payload), None)
            .await;
        Created { id, outcome }
    }

    async fn edit(
        &self,
        collection: CollectionKind,
        id: &str,
        fields: Map<String, Value>,
    ) -> MutationOutcome {
        let revert = match self.policy {
            EditPolicy::RevertOnFailure => {
                let store = self.ctx.store.lock();
                store.get(collection, id).map(|record| {
                    fields
                        .keys()
                        .map(|name| (name.clone(), record.field(name).cloned().unwrap_or(Value::Null)))
                        .collect::<Map<String, Value>>()
                })
            }
            _ => None,
        };
        self.run(Mutation::patch(id, collection, fields), revert)
            .await
    }

    async fn delete(&self, collection: CollectionKind, id: &str) -> MutationOutcome {
        self.run(Mutation::tombstone(id, collection), None).await
    }

    /// Apply locally, then write remotely.
    ///
    /// Writes for a record that already has an entry in the retry queue are
    /// queued behind it. `revert` holds the previous field values of an
    /// edited record; when present, a failed write restores them instead of
    /// queueing a retry.
    async fn run(&self, mutation: Mutation, revert: Option<Map<String, Value>>) -> MutationOutcome {
        let connected = self.ctx.network.is_connected();
        if self.policy == EditPolicy::RequireConnection && !connected {
            return MutationOutcome::Rejected(RejectReason::RequiresConnection);
        }
        if revert.is_some() && !connected {
            // The write would fail; leave the record untouched.
            return MutationOutcome::Rejected(RejectReason::Reverted("offline".into()));
        }

        let target = mutation.record_id().cloned();
        let collection = mutation.collection();
        let created = match &mutation {
            Mutation::Insert(op) => Some(op.id.clone()),
            _ => None,
        };

        let (touched, writes) = {
            let mut store = self.ctx.store.lock();
            let result = match store.apply(mutation, self.ctx.now()) {
                Ok(result) => result,
                Err(Error::OwnerMissing) => {
                    return MutationOutcome::Rejected(RejectReason::OwnerMissing)
                }
                Err(e) => {
                    tracing::debug!(collection = %collection, error = %e, "mutation refused");
                    return MutationOutcome::Rejected(RejectReason::Validation(e.to_string()));
                }
            };

            let writes: Vec<PendingWrite> = result
                .touched
                .iter()
                .map(|t| PendingWrite {
                    kind: if t.deleted {
                        OpKind::Delete
                    } else if created.as_ref() == Some(&t.id) && t.collection == collection {
                        OpKind::Create
                    } else {
                        OpKind::Update
                    },
                    collection: t.collection,
                    id: t.id.clone(),
                    revision: t.revision,
                })
                .collect();
            (result.collections(), writes)
        };

        if writes.is_empty() {
            return MutationOutcome::Applied;
        }
        self.ctx.persist_collections(&touched).await;

        if !connected {
            tracing::debug!(collection = %collection, writes = writes.len(), "offline, queueing writes");
            self.enqueue_all(writes).await;
            return MutationOutcome::Queued;
        }

        let (mut queued, direct): (Vec<PendingWrite>, Vec<PendingWrite>) = if revert.is_some() {
            (Vec::new(), writes)
        } else {
            let queue = self.ctx.retry_queue.lock();
            writes
                .into_iter()
                .partition(|w| queue.contains(w.collection, &w.id))
        };
        if !queued.is_empty() {
            tracing::debug!(collection = %collection, writes = queued.len(), "queueing behind earlier writes");
        }

        let results = join_all(direct.iter().map(|write| self.write(write))).await;

        let mut confirmed: BTreeMap<CollectionKind, Vec<(RecordId, Revision)>> = BTreeMap::new();
        let mut purged: BTreeMap<CollectionKind, Vec<RecordId>> = BTreeMap::new();
        let mut first_failure: Option<RemoteFailure> = None;
        let mut rejection: Option<RemoteFailure> = None;

        for (write, result) in direct.into_iter().zip(results) {
            match result {
                Ok(_) if write.kind == OpKind::Delete => {
                    purged.entry(write.collection).or_default().push(write.id)
                }
                Ok(Some(revision)) => confirmed
                    .entry(write.collection)
                    .or_default()
                    .push((write.id, revision)),
                // Written meanwhile by someone else, or deleted
                Ok(None) => {}
                Err(failure) => {
                    log_failure(write.collection, &write.id, failure.class(), "write");
                    first_failure.get_or_insert(failure.clone());
                    if failure.class() == FailureClass::Permanent {
                        rejection.get_or_insert(failure);
                    } else {
                        queued.push(write);
                    }
                }
            }
        }

        if !confirmed.is_empty() || !purged.is_empty() {
            {
                let mut store = self.ctx.store.lock();
                for (kind, ids) in &purged {
                    store.purge(*kind, ids);
                }
                for (kind, confirmations) in &confirmed {
                    store.confirm_synced(*kind, confirmations);
                }
            }
            let kinds: Vec<CollectionKind> =
                purged.keys().chain(confirmed.keys()).copied().collect();
            self.ctx.persist_collections(&kinds).await;
        }

        if let (Some(previous), Some(failure), Some(id)) = (revert, first_failure, target.as_ref()) {
            return self.restore(collection, id, previous, failure).await;
        }

        let is_queued = !queued.is_empty();
        self.enqueue_all(queued).await;

        match rejection {
            Some(failure) => MutationOutcome::Rejected(RejectReason::Validation(failure.to_string())),
            None if is_queued => MutationOutcome::Queued,
            None => MutationOutcome::Applied,
        }
    }

    /// Send one write. `Ok(Some(revision))` names the revision to confirm;
    /// `Ok(None)` means the record no longer needed it.
    async fn write(&self, write: &PendingWrite) -> Result<Option<Revision>, RemoteFailure> {
        match write.kind.first_step() {
            None => self
                .ctx
                .delete_remote(write.collection, &write.id)
                .await
                .map(|()| Some(write.revision)),
            Some(step) => match self.ctx.write_pending(write.collection, &write.id, step).await {
                Some(attempt) => attempt.result.map(|()| Some(attempt.revision)),
                None => Ok(None),
            },
        }
    }

    async fn enqueue_all(&self, writes: Vec<PendingWrite>) {
        for write in writes {
            if let Err(e) = self
                .retry
                .enqueue(write.kind, write.collection, write.id.clone(), write.revision)
                .await
            {
                tracing::warn!(collection = %write.collection, record_id = %write.id, error = %e, "failed to persist retry queue");
            }
        }
    }

    /// Put back the fields an edit overwrote.
    async fn restore(
        &self,
        collection: CollectionKind,
        id: &str,
        previous: Map<String, Value>,
        failure: RemoteFailure,
    ) -> MutationOutcome {
        let restored = {
            let mut store = self.ctx.store.lock();
            let now = self.ctx.now();
            store.apply(Mutation::patch(id, collection, previous), now)
        };
        match restored {
            Ok(_) => {
                tracing::info!(collection = %collection, record_id = %id, error = %failure, "edit reverted");
                self.ctx.persist_collections(&[collection]).await;
            }
            Err(e) => {
                tracing::warn!(collection = %collection, record_id = %id, error = %e, "failed to revert edit");
            }
        }
        MutationOutcome::Rejected(RejectReason::Reverted(failure.to_string()))
    }
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn check_date(date: Option<&str>) -> Result<(), RejectReason> {
    match date {
        Some(date) => NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map(|_| ())
            .map_err(|e| RejectReason::Validation(format!("invalid date {date:?}: {e}"))),
        None => Ok(()),
    }
}
