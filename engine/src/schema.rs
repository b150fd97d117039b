//! Schema definition and validation.
//!
//! Every collection declares its payload fields. Inserts are validated as
//! complete payloads, patches field by field, before they touch the store.

use crate::{error::Result, CollectionKind, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Version of the built-in fitness schema.
pub const SCHEMA_VERSION: SchemaVersion = 1;

/// Payload keys that live on the record itself and can never be patched.
pub const RESERVED_FIELDS: [&str; 6] = [
    "id",
    "ownerId",
    "synced",
    "deleted",
    "createdAt",
    "updatedAt",
];

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection this schema describes
    pub kind: CollectionKind,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    /// Create a new collection schema.
    pub fn new(kind: CollectionKind, fields: Vec<FieldDef>) -> Self {
        Self { kind, fields }
    }

    /// Look up a field definition.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a complete payload (inserts).
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        reject_reserved(obj)?;
        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }

    /// Validate a partial payload (patches).
    ///
    /// Only the fields present are checked; a required field may not be
    /// cleared to null.
    pub fn validate_patch(&self, patch: &Map<String, Value>) -> Result<()> {
        reject_reserved(patch)?;
        for (name, value) in patch {
            if let Some(def) = self.field(name) {
                def.validate(Some(value))?;
            }
        }
        Ok(())
    }
}

fn reject_reserved(obj: &Map<String, Value>) -> Result<()> {
    match RESERVED_FIELDS.iter().find(|f| obj.contains_key(**f)) {
        Some(field) => Err(Error::ImmutableField((*field).to_string())),
        None => Ok(()),
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version stamped into persisted snapshots
    pub version: SchemaVersion,
    /// Collection schemas by kind
    pub collections: BTreeMap<CollectionKind, CollectionSchema>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: BTreeMap::new(),
        }
    }

    /// The schema of the fitness application's collections.
    pub fn fitness() -> Self {
        use FieldType::*;

        Schema::new(SCHEMA_VERSION)
            .with_collection(CollectionSchema::new(
                CollectionKind::Workouts,
                vec![
                    FieldDef::required("name", String),
                    FieldDef::required("date", String),
                    FieldDef::optional("archived", Bool),
                    FieldDef::optional("notes", String),
                ],
            ))
            .with_collection(CollectionSchema::new(
                CollectionKind::Exercises,
                vec![
                    FieldDef::required("workoutId", String),
                    FieldDef::required("name", String),
                    FieldDef::optional("order", Int),
                    FieldDef::optional("userExerciseId", String),
                ],
            ))
            .with_collection(CollectionSchema::new(
                CollectionKind::ExerciseLogs,
                vec![
                    FieldDef::required("exerciseId", String),
                    FieldDef::required("weight", Float),
                    FieldDef::required("reps", Int),
                    FieldDef::optional("order", Int),
                    FieldDef::optional("notes", String),
                ],
            ))
            .with_collection(CollectionSchema::new(
                CollectionKind::UserExercises,
                vec![
                    FieldDef::required("name", String),
                    FieldDef::optional("muscleGroup", String),
                    FieldDef::optional("archived", Bool),
                ],
            ))
            .with_collection(CollectionSchema::new(
                CollectionKind::NutritionEntries,
                vec![
                    FieldDef::required("name", String),
                    FieldDef::required("calories", Float),
                    FieldDef::required("protein", Float),
                    FieldDef::required("carbs", Float),
                    FieldDef::required("fats", Float),
                    FieldDef::optional("date", String),
                ],
            ))
            .with_collection(CollectionSchema::new(
                CollectionKind::Settings,
                vec![
                    FieldDef::optional("weightUnit", String),
                    FieldDef::optional("calorieGoal", Float),
                    FieldDef::optional("proteinGoal", Float),
                    FieldDef::optional("carbsGoal", Float),
                    FieldDef::optional("fatsGoal", Float),
                    FieldDef::optional("restSeconds", Int),
                ],
            ))
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.kind, collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Get a collection schema.
    pub fn get_collection(&self, kind: CollectionKind) -> Result<&CollectionSchema> {
        self.collections
            .get(&kind)
            .ok_or_else(|| Error::UnknownCollection(kind.to_string()))
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::fitness()
    }
}
