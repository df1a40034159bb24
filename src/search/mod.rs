//! In-memory search index over catalog items.
//!
//! The index is derived state: it is built once from the store's item
//! collection and then patched by the store itself on every item write, so
//! it always mirrors the store once a write has returned. It only answers
//! "which item ids match"; callers hydrate full records from the store.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::db::Item;

/// Searchable projection of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: i64,
    /// Lower-cased name.
    pub name: String,
    /// Lower-cased notes.
    pub notes: String,
    /// Lower-cased barcodes.
    pub barcodes: BTreeSet<String>,
    pub item_type: Option<String>,
    pub sub_type: Option<String>,
    pub place: Option<String>,
    pub rating: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Item> for IndexEntry {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            name: item.name.to_lowercase(),
            notes: item.notes.to_lowercase(),
            barcodes: item.barcodes.iter().map(|b| b.to_lowercase()).collect(),
            item_type: item.item_type.clone(),
            sub_type: item.sub_type.clone(),
            place: item.place.clone(),
            rating: item.rating,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

/// A structured query. Blank `text` matches everything; the other fields
/// narrow the result when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub item_type: Option<String>,
    pub place: Option<String>,
    pub min_rating: Option<u8>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    fn matches(&self, entry: &IndexEntry, needle: &str) -> bool {
        if let Some(min) = self.min_rating {
            if entry.rating < min {
                return false;
            }
        }
        if !same_label(self.item_type.as_deref(), entry.item_type.as_deref()) {
            return false;
        }
        if !same_label(self.place.as_deref(), entry.place.as_deref()) {
            return false;
        }
        needle.is_empty()
            || entry.name.contains(needle)
            || entry.notes.contains(needle)
            || entry.barcodes.iter().any(|b| b.contains(needle))
    }
}

fn same_label(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match (wanted, actual) {
        (None, _) => true,
        (Some(w), Some(a)) => w.to_lowercase() == a.to_lowercase(),
        (Some(_), None) => false,
    }
}

#[derive(Debug, Default)]
enum IndexState {
    #[default]
    Uninitialized,
    /// Keyed by item id, which the store assigns in insertion order.
    Built(BTreeMap<i64, IndexEntry>),
}

#[derive(Debug, Default)]
pub struct SearchIndex {
    state: RwLock<IndexState>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_built(&self) -> bool {
        matches!(*self.read(), IndexState::Built(_))
    }

    pub fn len(&self) -> usize {
        match &*self.read() {
            IndexState::Built(entries) => entries.len(),
            IndexState::Uninitialized => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole index with entries for `items`.
    pub fn build<'a>(&self, items: impl IntoIterator<Item = &'a Item>) -> usize {
        let entries: BTreeMap<i64, IndexEntry> = items
            .into_iter()
            .map(|item| (item.id, IndexEntry::from(item)))
            .collect();
        let count = entries.len();
        *self.write() = IndexState::Built(entries);
        info!("Search index built with {} entries", count);
        count
    }

    pub fn apply_upsert(&self, item: &Item) {
        self.patch().upsert(item);
    }

    pub fn apply_removal(&self, id: i64) {
        self.patch().remove(id);
    }

    /// Hold the index for writing. Readers block until the patch is dropped,
    /// which lets the store commit and patch as one step.
    pub fn patch(&self) -> IndexPatch<'_> {
        IndexPatch { state: self.write() }
    }

    pub fn contains(&self, id: i64) -> bool {
        match &*self.read() {
            IndexState::Built(entries) => entries.contains_key(&id),
            IndexState::Uninitialized => false,
        }
    }

    pub fn entry(&self, id: i64) -> Option<IndexEntry> {
        match &*self.read() {
            IndexState::Built(entries) => entries.get(&id).cloned(),
            IndexState::Uninitialized => None,
        }
    }

    /// Ids whose name, notes or a barcode contain `text`, case-insensitively.
    /// Blank text returns every indexed id.
    pub fn query(&self, text: &str) -> Vec<i64> {
        self.query_with(&SearchQuery::text(text))
    }

    pub fn query_with(&self, query: &SearchQuery) -> Vec<i64> {
        let state = self.read();
        let IndexState::Built(entries) = &*state else {
            warn!("Search index queried before it was built");
            return Vec::new();
        };

        let needle = query.text.trim().to_lowercase();
        entries
            .values()
            .filter(|entry| query.matches(entry, &needle))
            .map(|entry| entry.id)
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive write access to the index.
pub struct IndexPatch<'a> {
    state: RwLockWriteGuard<'a, IndexState>,
}

impl IndexPatch<'_> {
    pub fn upsert(&mut self, item: &Item) {
        match &mut *self.state {
            IndexState::Built(entries) => {
                entries.insert(item.id, IndexEntry::from(item));
                debug!(id = item.id, "index entry upserted");
            }
            // The build reads the store, so it will pick this item up.
            IndexState::Uninitialized => {}
        }
    }

    pub fn remove(&mut self, id: i64) {
        if let IndexState::Built(entries) = &mut *self.state {
            if entries.remove(&id).is_some() {
                debug!(id, "index entry removed");
            }
        }
    }
}
