//! Snapshot types for persisting and restoring collections.
//!
//! Each collection is persisted on its own, under its owner's key, so a
//! reconciliation pass only rewrites the collection it touched. Snapshots use
//! `BTreeMap` so serialization is deterministic.

use crate::{
    error::Result, CollectionKind, Error, OwnerId, Record, RecordId, RecordStore, Schema,
    SchemaVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of one collection, tombstones included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Owner the records belong to
    pub owner_id: OwnerId,
    pub collection: CollectionKind,
    /// Records by id
    pub records: BTreeMap<RecordId, Record>,
}

impl CollectionSnapshot {
    /// Create a new empty snapshot.
    pub fn new(
        schema_version: SchemaVersion,
        owner_id: impl Into<OwnerId>,
        collection: CollectionKind,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            owner_id: owner_id.into(),
            collection,
            records: BTreeMap::new(),
        }
    }

    /// Add a record to the snapshot.
    pub fn add_record(&mut self, record: Record) {
        self.records.insert(record.id.clone(), record);
    }

    /// Count active (non-deleted) records.
    pub fn active_record_count(&self) -> usize {
        self.records.values().filter(|r| r.is_active()).count()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        let collection_schema = schema.get_collection(self.collection)?;
        for (id, record) in &self.records {
            if *id != record.id || record.collection != self.collection {
                return Err(Error::InvalidSnapshot(format!(
                    "record {} filed under {}/{}",
                    record.id, self.collection, id
                )));
            }
            if record.owner_id != self.owner_id {
                return Err(Error::OwnerMismatch {
                    id: record.id.clone(),
                    expected: self.owner_id.clone(),
                    actual: record.owner_id.clone(),
                });
            }
            if record.is_active() {
                collection_schema.validate_payload(&record.payload)?;
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

impl RecordStore {
    /// Export one collection, tombstones included.
    pub fn export_collection(&self, kind: CollectionKind) -> Result<CollectionSnapshot> {
        let owner = self.owner_id().ok_or(Error::OwnerMissing)?;
        let mut snapshot = CollectionSnapshot::new(self.schema().version, owner.clone(), kind);
        if let Some(collection) = self.collection(kind) {
            for record in collection.all_records() {
                snapshot.add_record(record.clone());
            }
        }
        Ok(snapshot)
    }

    /// Replace one collection with a persisted snapshot.
    ///
    /// The snapshot must belong to the signed-in owner and satisfy the
    /// schema. Nothing is changed if validation fails.
    pub fn import_collection(&mut self, snapshot: CollectionSnapshot) -> Result<()> {
        let owner = self.owner_id().ok_or(Error::OwnerMissing)?;
        if snapshot.owner_id != *owner {
            return Err(Error::OwnerMismatch {
                id: snapshot.collection.to_string(),
                expected: owner.clone(),
                actual: snapshot.owner_id,
            });
        }
        snapshot.validate(self.schema())?;

        self.replace_collection(snapshot.collection, snapshot.records.into_values().collect());
        Ok(())
    }
}
