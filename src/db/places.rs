//! Types for places.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored place. Items refer to places by name; deleting a place never
/// touches items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPlace {
    pub name: String,
}

impl NewPlace {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacePatch {
    pub name: Option<String>,
}

impl PlacePatch {
    pub(crate) fn apply(self, place: &mut Place) {
        if let Some(name) = self.name {
            place.name = name;
        }
    }
}
