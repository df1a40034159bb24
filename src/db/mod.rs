mod schema;
pub mod items;
pub mod photos;
pub mod places;
pub mod sqlite;

use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use items::{Item, ItemKey, ItemPatch, NewItem, MAX_RATING};
pub use photos::{Photo, PhotoPatch, PhotoRef};
pub use places::{NewPlace, Place, PlacePatch};
pub use schema::{MIGRATIONS, SCHEMA_VERSION};

use crate::error::{Collection, Error, Result};
use crate::search::SearchIndex;
use sqlite::SqliteDb;

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Current time, truncated to the millisecond precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// The record store: items, places and photos behind one connection.
///
/// Every operation waits for the connection, so writes are applied in the
/// order they were issued. The store owns the item [`SearchIndex`] and
/// patches it inside each item write, before the connection is released.
pub struct Database {
    inner: Mutex<SqliteDb>,
    index: SearchIndex,
}

impl Database {
    /// Open (or create) the store at `path` and migrate it to the current
    /// schema. The search index starts unbuilt; see [`Database::build_index`].
    pub fn open(path: &Path) -> Result<Self> {
        let db = SqliteDb::open(path).map_err(unavailable)?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = SqliteDb::open_in_memory().map_err(unavailable)?;
        Self::init(db)
    }

    fn init(mut db: SqliteDb) -> Result<Self> {
        let version = db.initialize().map_err(unavailable)?;
        info!("Store opened at schema version {}", version);
        Ok(Self {
            inner: Mutex::new(db),
            index: SearchIndex::new(),
        })
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// Rebuild the search index from every stored item.
    pub async fn build_index(&self) -> Result<usize> {
        let db = self.inner.lock().await;
        let items = db.list_items()?;
        Ok(self.index.build(&items))
    }

    pub async fn schema_version(&self) -> Result<u32> {
        self.inner.lock().await.schema_version()
    }

    // ========================================================================
    // Items
    // ========================================================================

    // The index is patched after the SQL succeeds but before the connection
    // is released, so no store reader can see the two disagree.

    pub async fn create_item(&self, item: NewItem) -> Result<i64> {
        let mut db = self.inner.lock().await;
        let item = db.insert_item(item, now())?;
        self.index.patch().upsert(&item);
        debug!(id = item.id, "item created");
        Ok(item.id)
    }

    pub async fn update_item(&self, id: i64, patch: ItemPatch) -> Result<i64> {
        self.revise_item(id, patch).await?;
        Ok(id)
    }

    /// Apply `patch` and return the item as it was before the write. The
    /// read and the write happen under one hold of the connection.
    pub async fn revise_item(&self, id: i64, patch: ItemPatch) -> Result<Item> {
        let mut db = self.inner.lock().await;
        let previous = db
            .get_item(id)?
            .ok_or_else(|| Error::not_found(Collection::Items, id))?;
        let item = db.update_item(id, patch, now())?;
        self.index.patch().upsert(&item);
        debug!(id, "item updated");
        Ok(previous)
    }

    /// Remove an item. Its photos are left alone; the photo manager owns
    /// their lifecycle.
    pub async fn delete_item(&self, id: i64) -> Result<()> {
        let mut db = self.inner.lock().await;
        db.delete_item(id)?;
        self.index.patch().remove(id);
        debug!(id, "item deleted");
        Ok(())
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        self.inner.lock().await.get_item(id)
    }

    pub async fn list_items(&self) -> Result<Vec<Item>> {
        self.inner.lock().await.list_items()
    }

    /// Items for `ids`, in the given order, skipping ids that are not stored.
    pub async fn get_items(&self, ids: &[i64]) -> Result<Vec<Item>> {
        self.inner.lock().await.get_items(ids)
    }

    pub async fn find_items(&self, key: &ItemKey) -> Result<Vec<Item>> {
        self.inner.lock().await.find_items(key)
    }

    pub async fn count_items(&self) -> Result<i64> {
        self.inner.lock().await.count_items()
    }

    // ========================================================================
    // Places
    // ========================================================================

    pub async fn create_place(&self, place: NewPlace) -> Result<i64> {
        let place = self.inner.lock().await.insert_place(place, now())?;
        debug!(id = place.id, "place created");
        Ok(place.id)
    }

    pub async fn update_place(&self, id: i64, patch: PlacePatch) -> Result<i64> {
        self.inner.lock().await.update_place(id, patch, now())?;
        Ok(id)
    }

    pub async fn delete_place(&self, id: i64) -> Result<()> {
        self.inner.lock().await.delete_place(id)
    }

    pub async fn get_place(&self, id: i64) -> Result<Option<Place>> {
        self.inner.lock().await.get_place(id)
    }

    pub async fn list_places(&self) -> Result<Vec<Place>> {
        self.inner.lock().await.list_places()
    }

    pub async fn get_places(&self, ids: &[i64]) -> Result<Vec<Place>> {
        self.inner.lock().await.get_places(ids)
    }

    pub async fn find_places_by_name(&self, name: &str) -> Result<Vec<Place>> {
        self.inner.lock().await.find_places_by_name(name)
    }

    pub async fn count_places(&self) -> Result<i64> {
        self.inner.lock().await.count_places()
    }

    // ========================================================================
    // Photos
    // ========================================================================

    /// Store a photo under the identity the caller generated.
    pub async fn create_photo(&self, photo: &Photo) -> Result<String> {
        self.inner.lock().await.insert_photo(photo)?;
        debug!(id = %photo.id, item_id = ?photo.item_id, "photo stored");
        Ok(photo.id.clone())
    }

    pub async fn update_photo(&self, id: &str, patch: PhotoPatch) -> Result<String> {
        self.inner.lock().await.update_photo(id, patch)?;
        Ok(id.to_string())
    }

    pub async fn delete_photo(&self, id: &str) -> Result<()> {
        self.inner.lock().await.delete_photo(id)
    }

    pub async fn delete_photo_if_orphaned(&self, id: &str, stale_before: DateTime<Utc>) -> Result<bool> {
        self.inner.lock().await.delete_photo_if_orphaned(id, stale_before)
    }

    pub async fn get_photo(&self, id: &str) -> Result<Option<Photo>> {
        self.inner.lock().await.get_photo(id)
    }

    pub async fn list_photos(&self) -> Result<Vec<Photo>> {
        self.inner.lock().await.list_photos()
    }

    pub async fn list_photo_refs(&self) -> Result<Vec<PhotoRef>> {
        self.inner.lock().await.list_photo_refs()
    }

    pub async fn get_photos(&self, ids: &[String]) -> Result<Vec<Photo>> {
        self.inner.lock().await.get_photos(ids)
    }

    pub async fn find_photos_by_item(&self, item_id: Option<i64>) -> Result<Vec<Photo>> {
        self.inner.lock().await.find_photos_by_item(item_id)
    }

    pub async fn count_photos(&self) -> Result<i64> {
        self.inner.lock().await.count_photos()
    }
}

fn unavailable(err: Error) -> Error {
    match err {
        Error::StorageUnavailable(_) => err,
        other => Error::StorageUnavailable(other.to_string()),
    }
}
