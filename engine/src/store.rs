//! Record store - the in-memory state container.
//!
//! The store holds every collection's records together with their sync
//! metadata. Local changes enter through [`RecordStore::apply`]; remote
//! confirmations enter through the batched [`RecordStore::confirm_synced`]
//! and [`RecordStore::purge`]. Readers subscribe to [`StoreEvent`]s.

use crate::{
    error::Result, CollectionKind, Entity, Error, InsertOp, Mutation, Origin, OwnerId, PatchOp,
    Record, RecordId, RemoteRecord, ReorderOp, Revision, Schema, Timestamp, TombstoneOp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// The records of one collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    records: HashMap<RecordId, Record>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Get a record by ID, including tombstones.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    fn insert(&mut self, record: Record) {
        self.records.insert(record.id.clone(), record);
    }

    /// Check if a record exists (including tombstones).
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Get all active (non-deleted) records.
    pub fn active_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values().filter(|r| r.is_active())
    }

    /// Get all records including tombstones.
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Active records the remote store has not confirmed.
    pub fn unsynced(&self) -> impl Iterator<Item = &Record> {
        self.active_records().filter(|r| !r.synced)
    }

    /// Records waiting for a confirmed remote delete.
    pub fn tombstoned(&self) -> impl Iterator<Item = &Record> {
        self.records.values().filter(|r| r.deleted)
    }

    /// Active children of `parent_id`, sorted by position.
    pub fn siblings(&self, parent_field: &str, parent_id: &str) -> Vec<&Record> {
        let mut siblings: Vec<&Record> = self
            .active_records()
            .filter(|r| r.str_field(parent_field) == Some(parent_id))
            .collect();
        siblings.sort_by(|a, b| {
            (a.order(), a.created_at, &a.id).cmp(&(b.order(), b.created_at, &b.id))
        });
        siblings
    }

    /// Count of active records.
    pub fn len(&self) -> usize {
        self.active_records().count()
    }

    /// Check if collection has no active records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A record changed by a mutation, with its new revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchedRecord {
    pub collection: CollectionKind,
    pub id: RecordId,
    pub revision: Revision,
    pub deleted: bool,
}

impl TouchedRecord {
    fn of(record: &Record) -> Self {
        Self {
            collection: record.collection,
            id: record.id.clone(),
            revision: record.revision,
            deleted: record.deleted,
        }
    }
}

/// Result of applying a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    /// Every record the mutation changed, cascades included
    pub touched: Vec<TouchedRecord>,
}

impl ApplyResult {
    /// Whether the mutation changed anything.
    pub fn is_noop(&self) -> bool {
        self.touched.is_empty()
    }

    /// Collections the mutation changed, deduplicated.
    pub fn collections(&self) -> Vec<CollectionKind> {
        let mut kinds: Vec<_> = self.touched.iter().map(|t| t.collection).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// What happened to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Records were inserted or modified
    Upserted(Vec<RecordId>),
    /// Records were removed after a confirmed remote delete
    Purged(Vec<RecordId>),
    /// The collection was cleared or replaced wholesale
    Reset,
}

/// Notification delivered to store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub collection: CollectionKind,
    pub origin: Origin,
    pub change: StoreChange,
}

/// Subscriber callback.
///
/// Listeners run while the store is being mutated and must not call back
/// into it.
pub type Listener = Box<dyn Fn(&StoreEvent) + Send + Sync>;

/// Handle returned by [`RecordStore::subscribe`].
pub type ListenerId = u64;

#[derive(Default)]
struct Listeners {
    next_id: ListenerId,
    entries: Vec<(ListenerId, Listener)>,
}

impl Listeners {
    fn add(&mut self, listener: Listener) -> ListenerId {
        self.next_id += 1;
        self.entries.push((self.next_id, listener));
        self.next_id
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    fn emit(&self, event: StoreEvent) {
        for (_, listener) in &self.entries {
            listener(&event);
        }
    }
}

/// Per-collection sync status counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub collection: CollectionKind,
    pub active: usize,
    pub unsynced: usize,
    pub tombstoned: usize,
}

/// The record store holding all local state for the signed-in owner.
pub struct RecordStore {
    /// Schema for validation
    schema: Schema,
    /// Owner whose records are loaded
    owner_id: Option<OwnerId>,
    /// Collections by kind
    collections: BTreeMap<CollectionKind, Collection>,
    listeners: Listeners,
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("owner_id", &self.owner_id)
            .field("collections", &self.collections)
            .field("listeners", &self.listeners.entries.len())
            .finish()
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(Schema::fitness())
    }
}

impl RecordStore {
    /// Create an empty store with no owner signed in.
    pub fn new(schema: Schema) -> Self {
        let collections = schema
            .collections
            .keys()
            .map(|kind| (*kind, Collection::new()))
            .collect();

        Self {
            schema,
            owner_id: None,
            collections,
            listeners: Listeners::default(),
        }
    }

    /// Create a store with an owner already signed in.
    pub fn with_owner(schema: Schema, owner_id: impl Into<OwnerId>) -> Self {
        let mut store = Self::new(schema);
        store.owner_id = Some(owner_id.into());
        store
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The owner whose records are loaded.
    pub fn owner_id(&self) -> Option<&OwnerId> {
        self.owner_id.as_ref()
    }

    /// Switch owner. Clears every collection when the owner changes.
    pub fn set_owner(&mut self, owner_id: Option<OwnerId>) {
        if self.owner_id == owner_id {
            return;
        }
        self.owner_id = owner_id;
        for collection in self.collections.values_mut() {
            collection.records.clear();
        }
        for kind in self.collections.keys() {
            self.listeners.emit(StoreEvent {
                collection: *kind,
                origin: Origin::Local,
                change: StoreChange::Reset,
            });
        }
    }

    /// Register a subscriber.
    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Apply a local mutation.
    ///
    /// Every touched record is left with `synced=false` and a bumped
    /// revision. Subscribers receive one event per touched collection.
    pub fn apply(&mut self, mutation: Mutation, timestamp: Timestamp) -> Result<ApplyResult> {
        let owner = self.owner_id.clone().ok_or(Error::OwnerMissing)?;

        let touched = match &mutation {
            Mutation::Insert(op) => self.apply_insert(op, &owner, timestamp)?,
            Mutation::Patch(op) => self.apply_patch(op, timestamp)?,
            Mutation::Tombstone(op) => self.apply_tombstone(op, timestamp)?,
            Mutation::Reorder(op) => self.apply_reorder(op, timestamp)?,
        };

        let result = ApplyResult { touched };
        for kind in result.collections() {
            let ids = result
                .touched
                .iter()
                .filter(|t| t.collection == kind)
                .map(|t| t.id.clone())
                .collect();
            self.listeners.emit(StoreEvent {
                collection: kind,
                origin: Origin::Local,
                change: StoreChange::Upserted(ids),
            });
        }

        Ok(result)
    }

    fn apply_insert(
        &mut self,
        op: &InsertOp,
        owner: &str,
        timestamp: Timestamp,
    ) -> Result<Vec<TouchedRecord>> {
        self.schema
            .get_collection(op.collection)?
            .validate_payload(&op.payload)?;

        if op.owner_id != owner {
            return Err(Error::OwnerMismatch {
                id: op.id.clone(),
                expected: owner.to_string(),
                actual: op.owner_id.clone(),
            });
        }
        if op.collection.is_singleton() && op.id != owner {
            return Err(Error::InvalidPayload(format!(
                "{} records are keyed by the owner id",
                op.collection
            )));
        }
        if self.collection_mut(op.collection).contains(&op.id) {
            return Err(Error::RecordAlreadyExists(op.id.clone()));
        }

        let mut payload = op.payload.clone();
        if let Some((parent_kind, field)) = op.collection.parent() {
            let parent_id = payload
                .get(field)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::MissingRequiredField(field.to_string()))?
                .to_string();

            match self.get_including_deleted(parent_kind, &parent_id) {
                Some(parent) if parent.is_active() => {}
                Some(_) => return Err(Error::MutationOnDeleted(parent_id)),
                None => {
                    return Err(Error::RecordNotFound {
                        collection: parent_kind,
                        id: parent_id,
                    })
                }
            }

            // Appended children take the next free position
            let position = self
                .collection_mut(op.collection)
                .siblings(field, &parent_id)
                .len();
            if let Value::Object(obj) = &mut payload {
                obj.insert("order".into(), Value::from(position as u64));
            }
        }

        let record = Record::new(
            op.id.clone(),
            op.owner_id.clone(),
            op.collection,
            payload,
            timestamp,
        );
        let touched = TouchedRecord::of(&record);
        self.collection_mut(op.collection).insert(record);

        Ok(vec![touched])
    }

    fn apply_patch(&mut self, op: &PatchOp, timestamp: Timestamp) -> Result<Vec<TouchedRecord>> {
        self.schema
            .get_collection(op.collection)?
            .validate_patch(&op.fields)?;

        if let Some((_, field)) = op.collection.parent() {
            if op.fields.contains_key(field) {
                return Err(Error::ImmutableField(field.to_string()));
            }
            if op.fields.contains_key("order") {
                return Err(Error::InvalidOrder(
                    "positions are assigned by reorder".into(),
                ));
            }
        }

        let record = self
            .collection_mut(op.collection)
            .get_mut(&op.id)
            .ok_or_else(|| Error::RecordNotFound {
                collection: op.collection,
                id: op.id.clone(),
            })?;

        if record.deleted {
            return Err(Error::MutationOnDeleted(op.id.clone()));
        }

        if record.merge_fields(&op.fields, timestamp) {
            Ok(vec![TouchedRecord::of(record)])
        } else {
            Ok(Vec::new())
        }
    }

    fn apply_tombstone(
        &mut self,
        op: &TombstoneOp,
        timestamp: Timestamp,
    ) -> Result<Vec<TouchedRecord>> {
        let record = self
            .get_including_deleted(op.collection, &op.id)
            .ok_or_else(|| Error::RecordNotFound {
                collection: op.collection,
                id: op.id.clone(),
            })?;

        // Deleting twice is a no-op
        if record.deleted {
            return Ok(Vec::new());
        }

        let parent = op
            .collection
            .parent()
            .and_then(|(_, field)| record.str_field(field).map(|p| (field, p.to_string())));

        let mut touched = Vec::new();
        self.tombstone_tree(op.collection, &op.id, timestamp, &mut touched);

        if let Some((field, parent_id)) = parent {
            touched.extend(self.densify(op.collection, field, &parent_id, timestamp));
        }

        Ok(touched)
    }

    fn tombstone_tree(
        &mut self,
        kind: CollectionKind,
        id: &str,
        timestamp: Timestamp,
        touched: &mut Vec<TouchedRecord>,
    ) {
        match self.collection_mut(kind).get_mut(id) {
            Some(record) if record.is_active() => {
                record.mark_deleted(timestamp);
                touched.push(TouchedRecord::of(record));
            }
            _ => return,
        }

        let children: Vec<(CollectionKind, &'static str)> = kind.children().collect();
        for (child_kind, field) in children {
            let child_ids: Vec<RecordId> = self
                .collection_mut(child_kind)
                .active_records()
                .filter(|r| r.str_field(field) == Some(id))
                .map(|r| r.id.clone())
                .collect();
            for child_id in child_ids {
                self.tombstone_tree(child_kind, &child_id, timestamp, touched);
            }
        }
    }

    fn apply_reorder(
        &mut self,
        op: &ReorderOp,
        timestamp: Timestamp,
    ) -> Result<Vec<TouchedRecord>> {
        let (_, field) = op
            .collection
            .parent()
            .ok_or_else(|| Error::InvalidOrder(format!("{} is not ordered", op.collection)))?;

        {
            let current: HashSet<&str> = self
                .collection_mut(op.collection)
                .siblings(field, &op.parent_id)
                .into_iter()
                .map(|r| r.id.as_str())
                .collect();
            let requested: HashSet<&str> = op.ordered_ids.iter().map(String::as_str).collect();

            if requested.len() != op.ordered_ids.len() {
                return Err(Error::InvalidOrder("duplicate id in ordering".into()));
            }
            if requested != current {
                return Err(Error::InvalidOrder(format!(
                    "ordering must list exactly the {} active children of {}",
                    current.len(),
                    op.parent_id
                )));
            }
        }

        Ok(self.assign_order(op.collection, &op.ordered_ids, timestamp))
    }

    /// Renumber the active children of a parent so positions stay dense.
    fn densify(
        &mut self,
        kind: CollectionKind,
        field: &str,
        parent_id: &str,
        timestamp: Timestamp,
    ) -> Vec<TouchedRecord> {
        let ids: Vec<RecordId> = self
            .collection_mut(kind)
            .siblings(field, parent_id)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();
        self.assign_order(kind, &ids, timestamp)
    }

    fn assign_order(
        &mut self,
        kind: CollectionKind,
        ids: &[RecordId],
        timestamp: Timestamp,
    ) -> Vec<TouchedRecord> {
        let collection = self.collection_mut(kind);
        ids.iter()
            .enumerate()
            .filter_map(|(position, id)| {
                let record = collection.get_mut(id)?;
                let mut fields = Map::new();
                fields.insert("order".into(), Value::from(position as u64));
                record
                    .merge_fields(&fields, timestamp)
                    .then(|| TouchedRecord::of(record))
            })
            .collect()
    }

    /// Flip `synced=true` for confirmed records in one batch.
    ///
    /// A confirmation only applies if the record still carries the revision
    /// that was sent; newer local edits stay unsynchronized. Returns the ids
    /// that were confirmed.
    pub fn confirm_synced(
        &mut self,
        kind: CollectionKind,
        confirmations: &[(RecordId, Revision)],
    ) -> Vec<RecordId> {
        let collection = self.collection_mut(kind);
        let confirmed: Vec<RecordId> = confirmations
            .iter()
            .filter_map(|(id, revision)| {
                let record = collection.get_mut(id)?;
                record.confirm(*revision).then(|| id.clone())
            })
            .collect();

        if !confirmed.is_empty() {
            self.listeners.emit(StoreEvent {
                collection: kind,
                origin: Origin::Remote,
                change: StoreChange::Upserted(confirmed.clone()),
            });
        }
        confirmed
    }

    /// Remove tombstoned records whose remote delete was confirmed.
    ///
    /// Records that are not tombstoned are left alone. Returns the ids that
    /// were purged.
    pub fn purge(&mut self, kind: CollectionKind, ids: &[RecordId]) -> Vec<RecordId> {
        let collection = self.collection_mut(kind);
        let purged: Vec<RecordId> = ids
            .iter()
            .filter(|id| collection.get(id).is_some_and(|r| r.deleted))
            .cloned()
            .collect();
        for id in &purged {
            collection.records.remove(id);
        }

        if !purged.is_empty() {
            self.listeners.emit(StoreEvent {
                collection: kind,
                origin: Origin::Remote,
                change: StoreChange::Purged(purged.clone()),
            });
        }
        purged
    }

    /// Fold records listed by the remote store into the collection.
    ///
    /// Unknown records are inserted as synced and clean local records take
    /// the remote fields. Records with pending local writes or tombstones
    /// keep their local state. Records that fail validation or belong to
    /// another owner are skipped. Returns the ids that changed.
    pub fn merge_remote(
        &mut self,
        kind: CollectionKind,
        remote: Vec<RemoteRecord>,
    ) -> Result<Vec<RecordId>> {
        let owner = self.owner_id.clone().ok_or(Error::OwnerMissing)?;
        let schema = self.schema.get_collection(kind)?.clone();
        let collection = self.collection_mut(kind);

        let mut merged = Vec::new();
        for incoming in remote {
            if incoming.owner_id != owner
                || incoming.collection != kind
                || schema.validate_payload(&incoming.fields).is_err()
            {
                continue;
            }

            match collection.get_mut(&incoming.id) {
                None => {
                    merged.push(incoming.id.clone());
                    collection.insert(Record::from_remote(incoming));
                }
                Some(local) if local.synced && local.is_active() => {
                    if local.payload != incoming.fields {
                        local.payload = incoming.fields;
                        local.updated_at = incoming.updated_at;
                        local.revision += 1;
                        local.origin = Origin::Remote;
                        merged.push(local.id.clone());
                    }
                }
                Some(_) => {}
            }
        }

        if !merged.is_empty() {
            self.listeners.emit(StoreEvent {
                collection: kind,
                origin: Origin::Remote,
                change: StoreChange::Upserted(merged.clone()),
            });
        }
        Ok(merged)
    }

    /// Replace a collection's records wholesale (restoring persisted state).
    pub(crate) fn replace_collection(&mut self, kind: CollectionKind, records: Vec<Record>) {
        let collection = self.collection_mut(kind);
        collection.records.clear();
        for record in records {
            collection.insert(record);
        }
        self.listeners.emit(StoreEvent {
            collection: kind,
            origin: Origin::Remote,
            change: StoreChange::Reset,
        });
    }

    fn collection_mut(&mut self, kind: CollectionKind) -> &mut Collection {
        self.collections.entry(kind).or_default()
    }

    /// Get an active record.
    pub fn get(&self, kind: CollectionKind, id: &str) -> Option<&Record> {
        self.get_including_deleted(kind, id)
            .filter(|r| r.is_active())
    }

    /// Get a record including tombstones.
    pub fn get_including_deleted(&self, kind: CollectionKind, id: &str) -> Option<&Record> {
        self.collections.get(&kind).and_then(|c| c.get(id))
    }

    /// Current wire form and revision of an active record that still needs
    /// a remote write. `None` once it is synced, tombstoned or gone.
    pub fn pending_write(&self, kind: CollectionKind, id: &str) -> Option<(Revision, RemoteRecord)> {
        self.get(kind, id)
            .filter(|r| !r.synced)
            .map(|r| (r.revision, r.to_remote()))
    }

    /// Read an active record as its typed entity.
    pub fn entity<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        self.get(T::COLLECTION, id).map(T::from_record).transpose()
    }

    /// Read every active record of an entity type.
    pub fn entities<T: Entity>(&self) -> Result<Vec<(RecordId, T)>> {
        self.collections
            .get(&T::COLLECTION)
            .into_iter()
            .flat_map(|c| c.active_records())
            .map(|r| Ok((r.id.clone(), T::from_record(r)?)))
            .collect()
    }

    /// Active children of a parent record, sorted by position.
    pub fn children(&self, kind: CollectionKind, parent_id: &str) -> Vec<&Record> {
        match (kind.parent(), self.collections.get(&kind)) {
            (Some((_, field)), Some(collection)) => collection.siblings(field, parent_id),
            _ => Vec::new(),
        }
    }

    /// Query records in a collection.
    pub fn query(&self, kind: CollectionKind) -> Option<QueryBuilder<'_>> {
        self.collections.get(&kind).map(QueryBuilder::new)
    }

    /// Get a collection.
    pub fn collection(&self, kind: CollectionKind) -> Option<&Collection> {
        self.collections.get(&kind)
    }

    /// Whether a collection has unsynchronized or tombstoned records.
    pub fn needs_sync(&self, kind: CollectionKind) -> bool {
        self.collections
            .get(&kind)
            .is_some_and(|c| c.all_records().any(Record::needs_sync))
    }

    /// Sync status counts for every collection.
    pub fn summary(&self) -> Vec<CollectionSummary> {
        self.collections
            .iter()
            .map(|(kind, collection)| CollectionSummary {
                collection: *kind,
                active: collection.len(),
                unsynced: collection.unsynced().count(),
                tombstoned: collection.tombstoned().count(),
            })
            .collect()
    }
}

/// Builder for querying records in a collection.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    collection: &'a Collection,
    include_deleted: bool,
}

impl<'a> QueryBuilder<'a> {
    fn new(collection: &'a Collection) -> Self {
        Self {
            collection,
            include_deleted: false,
        }
    }

    /// Include tombstoned records in results.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &'a Record> + 'a> {
        if self.include_deleted {
            Box::new(self.collection.all_records())
        } else {
            Box::new(self.collection.active_records())
        }
    }

    /// Get all matching records.
    pub fn all(self) -> Vec<&'a Record> {
        self.iter().collect()
    }

    /// Get the first matching record.
    pub fn first(self) -> Option<&'a Record> {
        self.iter().next()
    }

    /// Count matching records.
    pub fn count(self) -> usize {
        self.iter().count()
    }

    /// Filter records by a predicate on payload.
    pub fn filter<F>(self, predicate: F) -> Vec<&'a Record>
    where
        F: Fn(&Value) -> bool,
    {
        self.iter().filter(|r| predicate(&r.payload)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{NutritionEntry, Workout};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const OWNER: &str = "owner-1";

    fn test_store() -> RecordStore {
        RecordStore::with_owner(Schema::fitness(), OWNER)
    }

    fn add_workout(store: &mut RecordStore, id: &str) {
        store
            .apply(
                Mutation::insert(
                    id,
                    CollectionKind::Workouts,
                    OWNER,
                    json!({"name": "Push", "date": "2026-10-17"}),
                ),
                1000,
            )
            .unwrap();
    }

    fn add_exercise(store: &mut RecordStore, id: &str, workout_id: &str) {
        store
            .apply(
                Mutation::insert(
                    id,
                    CollectionKind::Exercises,
                    OWNER,
                    json!({"workoutId": workout_id, "name": id}),
                ),
                1000,
            )
            .unwrap();
    }

    fn add_log(store: &mut RecordStore, id: &str, exercise_id: &str) {
        store
            .apply(
                Mutation::insert(
                    id,
                    CollectionKind::ExerciseLogs,
                    OWNER,
                    json!({"exerciseId": exercise_id, "weight": 60.0, "reps": 8}),
                ),
                1000,
            )
            .unwrap();
    }

    fn orders(store: &RecordStore, workout_id: &str) -> Vec<(String, u64)> {
        store
            .children(CollectionKind::Exercises, workout_id)
            .into_iter()
            .map(|r| (r.id.clone(), r.order().unwrap()))
            .collect()
    }

    #[test]
    fn insert_without_owner_fails() {
        let mut store = RecordStore::new(Schema::fitness());
        let result = store.apply(
            Mutation::insert(
                "w-1",
                CollectionKind::Workouts,
                OWNER,
                json!({"name": "Push", "date": "2026-10-17"}),
            ),
            1000,
        );
        assert!(matches!(result, Err(Error::OwnerMissing)));
    }

    #[test]
    fn insert_is_unsynced_and_visible() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");

        let record = store.get(CollectionKind::Workouts, "w-1").unwrap();
        assert!(!record.synced);
        assert_eq!(record.revision, 1);
        assert!(store.needs_sync(CollectionKind::Workouts));

        let workout: Workout = store.entity("w-1").unwrap().unwrap();
        assert_eq!(workout.name, "Push");
    }

    #[test]
    fn insert_duplicate() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");

        let result = store.apply(
            Mutation::insert(
                "w-1",
                CollectionKind::Workouts,
                OWNER,
                json!({"name": "Again", "date": "2026-10-18"}),
            ),
            2000,
        );
        assert!(matches!(result, Err(Error::RecordAlreadyExists(_))));
    }

    #[test]
    fn insert_for_other_owner_rejected() {
        let mut store = test_store();
        let result = store.apply(
            Mutation::insert(
                "w-1",
                CollectionKind::Workouts,
                "someone-else",
                json!({"name": "Push", "date": "2026-10-17"}),
            ),
            1000,
        );
        assert!(matches!(result, Err(Error::OwnerMismatch { .. })));
    }

    #[test]
    fn settings_keyed_by_owner() {
        let mut store = test_store();
        let result = store.apply(
            Mutation::insert("settings-1", CollectionKind::Settings, OWNER, json!({})),
            1000,
        );
        assert!(matches!(result, Err(Error::InvalidPayload(_))));

        store
            .apply(
                Mutation::insert(OWNER, CollectionKind::Settings, OWNER, json!({"weightUnit": "lb"})),
                1000,
            )
            .unwrap();
        assert!(store.get(CollectionKind::Settings, OWNER).is_some());
    }

    #[test]
    fn child_requires_active_parent() {
        let mut store = test_store();
        let result = store.apply(
            Mutation::insert(
                "e-1",
                CollectionKind::Exercises,
                OWNER,
                json!({"workoutId": "missing", "name": "Bench"}),
            ),
            1000,
        );
        assert!(matches!(result, Err(Error::RecordNotFound { .. })));

        add_workout(&mut store, "w-1");
        store
            .apply(Mutation::tombstone("w-1", CollectionKind::Workouts), 2000)
            .unwrap();
        let result = store.apply(
            Mutation::insert(
                "e-1",
                CollectionKind::Exercises,
                OWNER,
                json!({"workoutId": "w-1", "name": "Bench"}),
            ),
            3000,
        );
        assert!(matches!(result, Err(Error::MutationOnDeleted(_))));
    }

    #[test]
    fn appended_children_get_dense_positions() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        add_exercise(&mut store, "e-1", "w-1");
        add_exercise(&mut store, "e-2", "w-1");
        add_exercise(&mut store, "e-3", "w-1");

        assert_eq!(
            orders(&store, "w-1"),
            vec![("e-1".into(), 0), ("e-2".into(), 1), ("e-3".into(), 2)]
        );
    }

    #[test]
    fn patch_merges_fields_and_resets_synced() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        store.confirm_synced(CollectionKind::Workouts, &[("w-1".into(), 1)]);
        assert!(store.get(CollectionKind::Workouts, "w-1").unwrap().synced);

        let result = store
            .apply(
                Mutation::set_field("w-1", CollectionKind::Workouts, "name", json!("Legs")),
                2000,
            )
            .unwrap();
        assert_eq!(result.touched.len(), 1);
        assert_eq!(result.touched[0].revision, 2);

        let record = store.get(CollectionKind::Workouts, "w-1").unwrap();
        assert!(!record.synced);
        assert_eq!(record.payload, json!({"name": "Legs", "date": "2026-10-17"}));
    }

    #[test]
    fn patch_rejects_parent_and_order_fields() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        add_exercise(&mut store, "e-1", "w-1");

        let result = store.apply(
            Mutation::set_field("e-1", CollectionKind::Exercises, "workoutId", json!("w-2")),
            2000,
        );
        assert!(matches!(result, Err(Error::ImmutableField(_))));

        let result = store.apply(
            Mutation::set_field("e-1", CollectionKind::Exercises, "order", json!(4)),
            2000,
        );
        assert!(matches!(result, Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn patch_on_tombstone_fails() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        store
            .apply(Mutation::tombstone("w-1", CollectionKind::Workouts), 2000)
            .unwrap();

        let result = store.apply(
            Mutation::set_field("w-1", CollectionKind::Workouts, "name", json!("Legs")),
            3000,
        );
        assert!(matches!(result, Err(Error::MutationOnDeleted(_))));
    }

    #[test]
    fn tombstone_cascades_to_children() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        add_exercise(&mut store, "e-1", "w-1");
        add_exercise(&mut store, "e-2", "w-1");
        add_log(&mut store, "l-1", "e-1");
        add_log(&mut store, "l-2", "e-2");

        let result = store
            .apply(Mutation::tombstone("w-1", CollectionKind::Workouts), 2000)
            .unwrap();
        assert_eq!(result.touched.len(), 5);
        assert!(result.touched.iter().all(|t| t.deleted));
        assert_eq!(
            result.collections(),
            vec![
                CollectionKind::Workouts,
                CollectionKind::Exercises,
                CollectionKind::ExerciseLogs
            ]
        );

        // Tombstones stay physically present but hidden from reads
        assert!(store.get(CollectionKind::Exercises, "e-1").is_none());
        assert!(store
            .get_including_deleted(CollectionKind::ExerciseLogs, "l-2")
            .unwrap()
            .deleted);
        assert_eq!(store.query(CollectionKind::ExerciseLogs).unwrap().count(), 0);

        // Second delete is a no-op
        let again = store
            .apply(Mutation::tombstone("w-1", CollectionKind::Workouts), 3000)
            .unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn tombstone_redensifies_siblings() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        add_exercise(&mut store, "e-1", "w-1");
        add_exercise(&mut store, "e-2", "w-1");
        add_exercise(&mut store, "e-3", "w-1");

        let result = store
            .apply(Mutation::tombstone("e-1", CollectionKind::Exercises), 2000)
            .unwrap();
        // e-1 tombstoned, e-2 and e-3 shifted
        assert_eq!(result.touched.len(), 3);
        assert_eq!(
            orders(&store, "w-1"),
            vec![("e-2".into(), 0), ("e-3".into(), 1)]
        );
    }

    #[test]
    fn reorder_assigns_dense_positions() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        add_exercise(&mut store, "e-1", "w-1");
        add_exercise(&mut store, "e-2", "w-1");
        add_exercise(&mut store, "e-3", "w-1");

        let result = store
            .apply(
                Mutation::reorder(
                    CollectionKind::Exercises,
                    "w-1",
                    vec!["e-3".into(), "e-1".into(), "e-2".into()],
                ),
                2000,
            )
            .unwrap();
        // Every record moved
        assert_eq!(result.touched.len(), 3);
        assert_eq!(
            orders(&store, "w-1"),
            vec![("e-3".into(), 0), ("e-1".into(), 1), ("e-2".into(), 2)]
        );
    }

    #[test]
    fn reorder_requires_exact_sibling_set() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        add_exercise(&mut store, "e-1", "w-1");
        add_exercise(&mut store, "e-2", "w-1");

        let missing = store.apply(
            Mutation::reorder(CollectionKind::Exercises, "w-1", vec!["e-2".into()]),
            2000,
        );
        assert!(matches!(missing, Err(Error::InvalidOrder(_))));

        let duplicate = store.apply(
            Mutation::reorder(
                CollectionKind::Exercises,
                "w-1",
                vec!["e-2".into(), "e-2".into()],
            ),
            2000,
        );
        assert!(matches!(duplicate, Err(Error::InvalidOrder(_))));

        let unordered = store.apply(
            Mutation::reorder(CollectionKind::Workouts, "w-1", vec!["w-1".into()]),
            2000,
        );
        assert!(matches!(unordered, Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn stale_confirmation_does_not_mark_synced() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        store
            .apply(
                Mutation::set_field("w-1", CollectionKind::Workouts, "name", json!("Legs")),
                2000,
            )
            .unwrap();

        // Remote confirmed revision 1 while revision 2 was being written
        let confirmed = store.confirm_synced(CollectionKind::Workouts, &[("w-1".into(), 1)]);
        assert!(confirmed.is_empty());
        assert!(!store.get(CollectionKind::Workouts, "w-1").unwrap().synced);
    }

    #[test]
    fn purge_only_removes_tombstones() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");
        add_workout(&mut store, "w-2");
        store
            .apply(Mutation::tombstone("w-1", CollectionKind::Workouts), 2000)
            .unwrap();

        let purged = store.purge(
            CollectionKind::Workouts,
            &["w-1".to_string(), "w-2".to_string(), "w-3".to_string()],
        );
        assert_eq!(purged, vec!["w-1".to_string()]);
        assert!(store
            .get_including_deleted(CollectionKind::Workouts, "w-1")
            .is_none());
        assert!(store.get(CollectionKind::Workouts, "w-2").is_some());
    }

    #[test]
    fn merge_remote_respects_pending_local_writes() {
        let mut store = test_store();
        add_workout(&mut store, "w-local");
        add_workout(&mut store, "w-clean");
        store.confirm_synced(CollectionKind::Workouts, &[("w-clean".into(), 1)]);

        let remote = |id: &str, name: &str| RemoteRecord {
            id: id.into(),
            owner_id: OWNER.into(),
            collection: CollectionKind::Workouts,
            fields: json!({"name": name, "date": "2026-10-17"}),
            created_at: 500,
            updated_at: 900,
        };

        let merged = store
            .merge_remote(
                CollectionKind::Workouts,
                vec![
                    remote("w-local", "Remote"),
                    remote("w-clean", "Remote"),
                    remote("w-new", "Remote"),
                    RemoteRecord {
                        owner_id: "intruder".into(),
                        ..remote("w-other", "Remote")
                    },
                ],
            )
            .unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(
            store.get(CollectionKind::Workouts, "w-local").unwrap().str_field("name"),
            Some("Push")
        );
        assert_eq!(
            store.get(CollectionKind::Workouts, "w-clean").unwrap().str_field("name"),
            Some("Remote")
        );
        let new = store.get(CollectionKind::Workouts, "w-new").unwrap();
        assert!(new.synced);
        assert!(store.get(CollectionKind::Workouts, "w-other").is_none());
    }

    #[test]
    fn subscribers_see_origin() {
        let mut store = test_store();
        let events: Arc<Mutex<Vec<StoreEvent>>> = Arc::default();
        let sink = events.clone();
        let id = store.subscribe(Box::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));

        add_workout(&mut store, "w-1");
        store.confirm_synced(CollectionKind::Workouts, &[("w-1".into(), 1)]);

        {
            let events = events.lock().unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].origin, Origin::Local);
            assert_eq!(events[1].origin, Origin::Remote);
        }

        assert!(store.unsubscribe(id));
        add_workout(&mut store, "w-2");
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn set_owner_clears_records() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");

        store.set_owner(Some(OWNER.into()));
        assert!(store.get(CollectionKind::Workouts, "w-1").is_some());

        store.set_owner(Some("owner-2".into()));
        assert!(store.get(CollectionKind::Workouts, "w-1").is_none());
        assert_eq!(store.owner_id().map(String::as_str), Some("owner-2"));
    }

    #[test]
    fn summary_counts() {
        let mut store = test_store();
        let banana = NutritionEntry {
            name: "Banana".into(),
            calories: 105.0,
            protein: 1.0,
            carbs: 27.0,
            fats: 0.0,
            date: None,
        };
        store
            .apply(
                Mutation::insert(
                    "n-1",
                    CollectionKind::NutritionEntries,
                    OWNER,
                    banana.to_payload().unwrap(),
                ),
                1000,
            )
            .unwrap();
        add_workout(&mut store, "w-1");
        store
            .apply(Mutation::tombstone("w-1", CollectionKind::Workouts), 2000)
            .unwrap();

        let summary = store.summary();
        let nutrition = summary
            .iter()
            .find(|s| s.collection == CollectionKind::NutritionEntries)
            .unwrap();
        assert_eq!((nutrition.active, nutrition.unsynced, nutrition.tombstoned), (1, 1, 0));
        let workouts = summary
            .iter()
            .find(|s| s.collection == CollectionKind::Workouts)
            .unwrap();
        assert_eq!((workouts.active, workouts.unsynced, workouts.tombstoned), (0, 0, 1));

        let entries: Vec<(RecordId, NutritionEntry)> = store.entities().unwrap();
        assert_eq!(entries, vec![("n-1".to_string(), banana)]);
    }

    #[test]
    fn pending_write_tracks_latest_unsynced_state() {
        let mut store = test_store();
        add_workout(&mut store, "w-1");

        let (revision, record) = store.pending_write(CollectionKind::Workouts, "w-1").unwrap();
        assert_eq!(record.fields["name"], "Push");

        store
            .apply(
                Mutation::set_field("w-1", CollectionKind::Workouts, "name", json!("Pull")),
                2000,
            )
            .unwrap();
        let (latest, record) = store.pending_write(CollectionKind::Workouts, "w-1").unwrap();
        assert!(latest > revision);
        assert_eq!(record.fields["name"], "Pull");

        store.confirm_synced(CollectionKind::Workouts, &[("w-1".to_string(), latest)]);
        assert!(store.pending_write(CollectionKind::Workouts, "w-1").is_none());

        store
            .apply(Mutation::tombstone("w-1", CollectionKind::Workouts), 3000)
            .unwrap();
        assert!(store.pending_write(CollectionKind::Workouts, "w-1").is_none());
        assert!(store.pending_write(CollectionKind::Workouts, "missing").is_none());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Append,
            Delete(usize),
            Reverse,
        }

        fn arb_step() -> impl Strategy<Value = Step> {
            prop_oneof![
                3 => Just(Step::Append),
                2 => (0usize..16).prop_map(Step::Delete),
                1 => Just(Step::Reverse),
            ]
        }

        proptest! {
            #[test]
            fn prop_sibling_orders_stay_dense(steps in prop::collection::vec(arb_step(), 1..40)) {
                let mut store = test_store();
                add_workout(&mut store, "w-1");
                let mut next = 0;

                for step in steps {
                    let ids: Vec<RecordId> = store
                        .children(CollectionKind::Exercises, "w-1")
                        .iter()
                        .map(|r| r.id.clone())
                        .collect();
                    match step {
                        Step::Append => {
                            add_exercise(&mut store, &format!("e-{next}"), "w-1");
                            next += 1;
                        }
                        Step::Delete(i) if !ids.is_empty() => {
                            let id = ids[i % ids.len()].clone();
                            store
                                .apply(Mutation::tombstone(id, CollectionKind::Exercises), 2000)
                                .unwrap();
                        }
                        Step::Reverse if ids.len() > 1 => {
                            let reversed: Vec<RecordId> = ids.into_iter().rev().collect();
                            store
                                .apply(Mutation::reorder(CollectionKind::Exercises, "w-1", reversed), 2000)
                                .unwrap();
                        }
                        _ => {}
                    }

                    let orders: Vec<Option<u64>> = store
                        .children(CollectionKind::Exercises, "w-1")
                        .iter()
                        .map(|r| r.order())
                        .collect();
                    let expected: Vec<Option<u64>> = (0..orders.len() as u64).map(Some).collect();
                    prop_assert_eq!(orders, expected);
                }
            }
        }
    }
}
