//! Collection kinds and their relationships.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The synchronized entity collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectionKind {
    Workouts,
    Exercises,
    ExerciseLogs,
    UserExercises,
    NutritionEntries,
    /// One record per owner, keyed by the owner id
    Settings,
}

impl CollectionKind {
    /// Every collection, parents before children.
    pub const ALL: [CollectionKind; 6] = [
        CollectionKind::Workouts,
        CollectionKind::Exercises,
        CollectionKind::ExerciseLogs,
        CollectionKind::UserExercises,
        CollectionKind::NutritionEntries,
        CollectionKind::Settings,
    ];

    /// Stable wire and storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Workouts => "workouts",
            CollectionKind::Exercises => "exercises",
            CollectionKind::ExerciseLogs => "exerciseLogs",
            CollectionKind::UserExercises => "userExercises",
            CollectionKind::NutritionEntries => "nutritionEntries",
            CollectionKind::Settings => "settings",
        }
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self, CollectionKind::Settings)
    }

    /// Parent collection and the payload field holding the parent id.
    pub fn parent(&self) -> Option<(CollectionKind, &'static str)> {
        match self {
            CollectionKind::Exercises => Some((CollectionKind::Workouts, "workoutId")),
            CollectionKind::ExerciseLogs => Some((CollectionKind::Exercises, "exerciseId")),
            _ => None,
        }
    }

    /// Collections whose records hang off records of this collection.
    pub fn children(&self) -> impl Iterator<Item = (CollectionKind, &'static str)> + '_ {
        Self::ALL.into_iter().filter_map(move |kind| match kind.parent() {
            Some((parent, field)) if parent == *self => Some((kind, field)),
            _ => None,
        })
    }

    /// Whether records carry a dense `order` field scoped to their parent.
    pub fn is_ordered(&self) -> bool {
        self.parent().is_some()
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownCollection(s.to_string()))
    }
}
