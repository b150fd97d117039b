//! Typed domain entities.
//!
//! Records hold their domain fields as JSON; these types are the typed view
//! callers build payloads from and read records into.

use crate::{error::Result, CollectionKind, Error, Record};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A domain type stored in one collection.
pub trait Entity: Serialize + DeserializeOwned {
    const COLLECTION: CollectionKind;

    /// Serialize into a record payload.
    fn to_payload(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Read a record's payload back into the typed entity.
    fn from_record(record: &Record) -> Result<Self> {
        if record.collection != Self::COLLECTION {
            return Err(Error::InvalidPayload(format!(
                "record {} belongs to {}, not {}",
                record.id,
                record.collection,
                Self::COLLECTION
            )));
        }
        serde_json::from_value(record.payload.clone())
            .map_err(|e| Error::InvalidPayload(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub name: String,
    /// Calendar date, `YYYY-MM-DD`
    pub date: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for Workout {
    const COLLECTION: CollectionKind = CollectionKind::Workouts;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub workout_id: String,
    pub name: String,
    /// Assigned by the store when appended
    #[serde(default)]
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_exercise_id: Option<String>,
}

impl Entity for Exercise {
    const COLLECTION: CollectionKind = CollectionKind::Exercises;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseLog {
    pub exercise_id: String,
    pub weight: f64,
    pub reps: u32,
    #[serde(default)]
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for ExerciseLog {
    const COLLECTION: CollectionKind = CollectionKind::ExerciseLogs;
}

/// A custom exercise defined by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserExercise {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muscle_group: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

impl Entity for UserExercise {
    const COLLECTION: CollectionKind = CollectionKind::UserExercises;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEntry {
    pub name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl Entity for NutritionEntry {
    const COLLECTION: CollectionKind = CollectionKind::NutritionEntries;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Kg,
    Lb,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub weight_unit: WeightUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calorie_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fats_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_seconds: Option<u32>,
}

impl Entity for Settings {
    const COLLECTION: CollectionKind = CollectionKind::Settings;
}

/// Macro totals over a set of nutrition entries.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
}

impl MacroTotals {
    /// Sum entries; callers pass active records only.
    pub fn sum<'a>(entries: impl IntoIterator<Item = &'a NutritionEntry>) -> Self {
        entries.into_iter().fold(Self::default(), |acc, e| Self {
            calories: acc.calories + e.calories,
            protein: acc.protein + e.protein,
            carbs: acc.carbs + e.carbs,
            fats: acc.fats + e.fats,
        })
    }
}
