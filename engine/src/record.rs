//! Record types for storing data.

use crate::{CollectionKind, OwnerId, RecordId, Revision, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where the last change to a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Created or modified locally
    Local,
    /// Confirmed by or received from the remote store
    Remote,
}

/// A syncable record in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Client-generated identifier, never reassigned
    pub id: RecordId,
    /// Owning user, immutable after creation
    pub owner_id: OwnerId,
    /// Collection this record belongs to
    pub collection: CollectionKind,
    /// Domain fields (JSON object)
    pub payload: Value,
    /// Remote store has confirmed this revision
    pub synced: bool,
    /// Tombstone: pending remote deletion
    pub deleted: bool,
    /// Local change counter, bumped on every local change
    pub revision: Revision,
    /// When the record was first created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the record was last changed (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Source of the last change
    pub origin: Origin,
}

impl Record {
    /// Create a new, unsynchronized local record.
    pub fn new(
        id: impl Into<RecordId>,
        owner_id: impl Into<OwnerId>,
        collection: CollectionKind,
        payload: Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            collection,
            payload,
            synced: false,
            deleted: false,
            revision: 1,
            created_at: timestamp,
            updated_at: timestamp,
            origin: Origin::Local,
        }
    }

    /// Rebuild a confirmed record from its remote representation.
    pub fn from_remote(remote: RemoteRecord) -> Self {
        Self {
            id: remote.id,
            owner_id: remote.owner_id,
            collection: remote.collection,
            payload: remote.fields,
            synced: true,
            deleted: false,
            revision: 1,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
            origin: Origin::Remote,
        }
    }

    /// Check if record is active (not tombstoned).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Whether a reconciliation pass has work to do for this record.
    pub fn needs_sync(&self) -> bool {
        self.deleted || !self.synced
    }

    /// Read a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Read a string payload field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Position among siblings, for ordered collections.
    pub fn order(&self) -> Option<u64> {
        self.field("order").and_then(Value::as_u64)
    }

    /// Merge fields into the payload.
    ///
    /// Returns false and leaves the record untouched when every field
    /// already holds the given value.
    pub fn merge_fields(&mut self, fields: &Map<String, Value>, timestamp: Timestamp) -> bool {
        let changed = fields
            .iter()
            .any(|(name, value)| self.payload.get(name) != Some(value));
        if !changed {
            return false;
        }

        if !self.payload.is_object() {
            self.payload = Value::Object(Map::new());
        }
        if let Value::Object(obj) = &mut self.payload {
            for (name, value) in fields {
                obj.insert(name.clone(), value.clone());
            }
        }
        self.touch(timestamp);
        true
    }

    /// Mark record as deleted (tombstone).
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.touch(timestamp);
    }

    /// Flip `synced` if the record has not changed since `revision`.
    ///
    /// Returns whether the confirmation applied.
    pub fn confirm(&mut self, revision: Revision) -> bool {
        if self.revision != revision || self.deleted {
            return false;
        }
        self.synced = true;
        self.origin = Origin::Remote;
        true
    }

    /// Wire representation sent to the remote store.
    pub fn to_remote(&self) -> RemoteRecord {
        RemoteRecord {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            collection: self.collection,
            fields: self.payload.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self, timestamp: Timestamp) {
        self.synced = false;
        self.revision += 1;
        self.updated_at = timestamp;
        self.origin = Origin::Local;
    }
}

/// The remote store's view of a record.
///
/// Sync metadata (`synced`, `deleted`, `revision`) never leaves the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub collection: CollectionKind,
    pub fields: Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
