//! Types for catalog items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Highest rating an item can carry.
pub const MAX_RATING: u8 = 5;

/// A stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub notes: String,
    pub item_type: Option<String>,
    pub sub_type: Option<String>,
    pub rating: u8,
    pub barcodes: BTreeSet<String>,
    /// Weak reference to a place, by name.
    pub place: Option<String>,
    /// Ordered photo identities.
    pub photos: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An item that has not been saved yet. Identity and timestamps are
/// assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewItem {
    pub name: String,
    pub notes: String,
    pub item_type: Option<String>,
    pub sub_type: Option<String>,
    pub rating: u8,
    pub barcodes: BTreeSet<String>,
    pub place: Option<String>,
    pub photos: Vec<String>,
}

impl NewItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcodes.insert(barcode.into());
        self
    }

    pub(crate) fn validate(&mut self) -> Result<()> {
        validate_rating(self.rating)?;
        self.barcodes = normalize_barcodes(std::mem::take(&mut self.barcodes));
        Ok(())
    }
}

/// Partial update for an item. `Some` replaces the stored value, `None`
/// leaves it alone. Nullable fields take `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub notes: Option<String>,
    pub item_type: Option<Option<String>>,
    pub sub_type: Option<Option<String>>,
    pub rating: Option<u8>,
    pub barcodes: Option<BTreeSet<String>>,
    pub place: Option<Option<String>>,
    pub photos: Option<Vec<String>>,
}

impl ItemPatch {
    /// Merge this patch into `item`, field by field.
    pub(crate) fn apply(self, item: &mut Item) -> Result<()> {
        if let Some(rating) = self.rating {
            validate_rating(rating)?;
            item.rating = rating;
        }
        if let Some(name) = self.name {
            item.name = name;
        }
        if let Some(notes) = self.notes {
            item.notes = notes;
        }
        if let Some(item_type) = self.item_type {
            item.item_type = item_type;
        }
        if let Some(sub_type) = self.sub_type {
            item.sub_type = sub_type;
        }
        if let Some(barcodes) = self.barcodes {
            item.barcodes = normalize_barcodes(barcodes);
        }
        if let Some(place) = self.place {
            item.place = place;
        }
        if let Some(photos) = self.photos {
            item.photos = photos;
        }
        Ok(())
    }
}

/// Secondary keys for exact-match item lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKey {
    Barcode(String),
    Name(String),
    Type(String),
    Rating(u8),
    Place(String),
}

fn validate_rating(rating: u8) -> Result<()> {
    if rating > MAX_RATING {
        return Err(Error::Invalid(format!(
            "rating {} is outside 0..={}",
            rating, MAX_RATING
        )));
    }
    Ok(())
}

fn normalize_barcodes(barcodes: BTreeSet<String>) -> BTreeSet<String> {
    barcodes
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect()
}
