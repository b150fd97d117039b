//! Mutations applied to the record store.
//!
//! Changes are expressed as mutations, not direct field writes, so the store
//! can validate them, keep sync metadata consistent and notify readers.

use crate::{CollectionKind, OwnerId, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Insert a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOp {
    /// Client-generated record id
    pub id: RecordId,
    pub collection: CollectionKind,
    /// Owner the record is created for
    pub owner_id: OwnerId,
    /// Complete domain payload
    pub payload: Value,
}

/// Merge fields into an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOp {
    pub id: RecordId,
    pub collection: CollectionKind,
    /// Fields to overwrite; absent fields are left alone
    pub fields: Map<String, Value>,
}

/// Tombstone a record and the records hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TombstoneOp {
    pub id: RecordId,
    pub collection: CollectionKind,
}

/// Renumber the children of one parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderOp {
    pub collection: CollectionKind,
    /// Parent whose children are renumbered
    pub parent_id: RecordId,
    /// Every active child of the parent, in the new order
    pub ordered_ids: Vec<RecordId>,
}

/// A mutation that can be applied to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    Insert(InsertOp),
    Patch(PatchOp),
    Tombstone(TombstoneOp),
    Reorder(ReorderOp),
}

impl Mutation {
    pub fn insert(
        id: impl Into<RecordId>,
        collection: CollectionKind,
        owner_id: impl Into<OwnerId>,
        payload: Value,
    ) -> Self {
        Mutation::Insert(InsertOp {
            id: id.into(),
            collection,
            owner_id: owner_id.into(),
            payload,
        })
    }

    pub fn patch(
        id: impl Into<RecordId>,
        collection: CollectionKind,
        fields: Map<String, Value>,
    ) -> Self {
        Mutation::Patch(PatchOp {
            id: id.into(),
            collection,
            fields,
        })
    }

    /// Patch a single field.
    pub fn set_field(
        id: impl Into<RecordId>,
        collection: CollectionKind,
        name: impl Into<String>,
        value: Value,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert(name.into(), value);
        Self::patch(id, collection, fields)
    }

    pub fn tombstone(id: impl Into<RecordId>, collection: CollectionKind) -> Self {
        Mutation::Tombstone(TombstoneOp {
            id: id.into(),
            collection,
        })
    }

    pub fn reorder(
        collection: CollectionKind,
        parent_id: impl Into<RecordId>,
        ordered_ids: Vec<RecordId>,
    ) -> Self {
        Mutation::Reorder(ReorderOp {
            collection,
            parent_id: parent_id.into(),
            ordered_ids,
        })
    }

    /// Get the collection this mutation targets.
    pub fn collection(&self) -> CollectionKind {
        match self {
            Mutation::Insert(op) => op.collection,
            Mutation::Patch(op) => op.collection,
            Mutation::Tombstone(op) => op.collection,
            Mutation::Reorder(op) => op.collection,
        }
    }

    /// Get the record this mutation targets, if it targets a single one.
    pub fn record_id(&self) -> Option<&RecordId> {
        match self {
            Mutation::Insert(op) => Some(&op.id),
            Mutation::Patch(op) => Some(&op.id),
            Mutation::Tombstone(op) => Some(&op.id),
            Mutation::Reorder(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors() {
        let op = Mutation::set_field("w-1", CollectionKind::Workouts, "name", json!("Legs"));
        assert_eq!(op.collection(), CollectionKind::Workouts);
        assert_eq!(op.record_id(), Some(&"w-1".to_string()));

        let op = Mutation::reorder(
            CollectionKind::Exercises,
            "w-1",
            vec!["e-2".into(), "e-1".into()],
        );
        assert_eq!(op.collection(), CollectionKind::Exercises);
        assert_eq!(op.record_id(), None);
    }

    #[test]
    fn tagged_serialization() {
        let op = Mutation::tombstone("n-1", CollectionKind::NutritionEntries);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            json!({"type": "tombstone", "id": "n-1", "collection": "nutritionEntries"})
        );

        let parsed: Mutation = serde_json::from_value(json!({
            "type": "insert",
            "id": "n-2",
            "collection": "nutritionEntries",
            "ownerId": "owner-1",
            "payload": {"name": "Banana", "calories": 105, "protein": 1, "carbs": 27, "fats": 0}
        }))
        .unwrap();
        assert!(matches!(parsed, Mutation::Insert(ref op) if op.id == "n-2"));
    }
}
