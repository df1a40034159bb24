//! The assembled catalog: record store, search index and photo manager.
//!
//! [`Catalog::open`] is the one-time ready step. Once it returns, the store
//! is migrated and the search index is built, so queries are safe.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, PhotoConfig};
use crate::db::{Database, Item, ItemPatch, NewItem, NewPlace, Place, PlacePatch};
use crate::error::{Collection, Error, Result};
use crate::photos::PhotoManager;
use crate::search::SearchQuery;

/// Record counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub items: i64,
    pub places: i64,
    pub photos: i64,
}

pub struct Catalog {
    db: Arc<Database>,
    photos: PhotoManager,
}

impl Catalog {
    pub async fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        Self::ready(db, config.photos.clone()).await
    }

    pub async fn open_in_memory(photos: PhotoConfig) -> Result<Self> {
        Self::ready(Database::open_in_memory()?, photos).await
    }

    async fn ready(db: Database, photos: PhotoConfig) -> Result<Self> {
        let db = Arc::new(db);
        let indexed = db.build_index().await?;
        info!("Catalog ready with {} items", indexed);
        Ok(Self {
            photos: PhotoManager::new(db.clone(), photos),
            db,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn photos(&self) -> &PhotoManager {
        &self.photos
    }

    // ========================================================================
    // Search
    // ========================================================================

    pub fn query(&self, text: &str) -> Vec<i64> {
        self.db.index().query(text)
    }

    pub fn query_with(&self, query: &SearchQuery) -> Vec<i64> {
        self.db.index().query_with(query)
    }

    /// Run a text query and hydrate the matching items.
    pub async fn search(&self, text: &str) -> Result<Vec<Item>> {
        let ids = self.query(text);
        self.db.get_items(&ids).await
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Save a new item and take ownership of the photos it lists.
    pub async fn save_item(&self, item: NewItem) -> Result<i64> {
        let photo_ids = item.photos.clone();
        let id = self.db.create_item(item).await?;
        self.adopt_photos(id, &photo_ids).await?;
        Ok(id)
    }

    /// Patch an item. When the photo list changes, newly listed photos are
    /// bound to the item and photos dropped from the list are detached.
    pub async fn update_item(&self, id: i64, patch: ItemPatch) -> Result<i64> {
        let Some(new_photos) = patch.photos.clone() else {
            return self.db.update_item(id, patch).await;
        };

        let before = self.db.revise_item(id, patch).await?;
        self.adopt_photos(id, &new_photos).await?;

        let dropped: Vec<String> = before
            .photos
            .into_iter()
            .filter(|photo_id| !new_photos.contains(photo_id))
            .collect();
        self.photos.detach_all(&dropped).await?;
        Ok(id)
    }

    /// Delete an item and every photo it owns.
    pub async fn delete_item(&self, id: i64) -> Result<()> {
        let item = self
            .db
            .get_item(id)
            .await?
            .ok_or_else(|| Error::not_found(Collection::Items, id))?;
        self.db.delete_item(id).await?;

        let mut photo_ids = item.photos;
        for photo in self.db.find_photos_by_item(Some(id)).await? {
            if !photo_ids.contains(&photo.id) {
                photo_ids.push(photo.id);
            }
        }
        let removed = self.photos.detach_all(&photo_ids).await?;
        info!("Deleted item {} and {} photos", id, removed);
        Ok(())
    }

    async fn adopt_photos(&self, item_id: i64, photo_ids: &[String]) -> Result<()> {
        for photo_id in photo_ids {
            match self.photos.reassign_owner(photo_id, item_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!("Item {} lists missing photo {}", item_id, photo_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Places
    // ========================================================================

    pub async fn create_place(&self, place: NewPlace) -> Result<i64> {
        self.db.create_place(place).await
    }

    pub async fn update_place(&self, id: i64, patch: PlacePatch) -> Result<i64> {
        self.db.update_place(id, patch).await
    }

    /// Delete a place. Items naming it keep their reference.
    pub async fn delete_place(&self, id: i64) -> Result<()> {
        self.db.delete_place(id).await
    }

    pub async fn list_places(&self) -> Result<Vec<Place>> {
        self.db.list_places().await
    }

    pub async fn stats(&self) -> Result<CatalogStats> {
        Ok(CatalogStats {
            items: self.db.count_items().await?,
            places: self.db.count_places().await?,
            photos: self.db.count_photos().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::jpeg_payload;
    use tempfile::tempdir;

    async fn catalog() -> Catalog {
        Catalog::open_in_memory(PhotoConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_place_and_item_query() {
        let catalog = catalog().await;
        catalog.create_place(NewPlace::named("Cafe Lux")).await.unwrap();
        let latte = NewItem {
            name: "Latte".to_string(),
            rating: 5,
            place: Some("Cafe Lux".to_string()),
            ..Default::default()
        };
        let id = catalog.save_item(latte).await.unwrap();

        assert_eq!(catalog.query("latte"), vec![id]);
        assert!(catalog.query("nope").is_empty());

        let found = catalog.search("LAT").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].place.as_deref(), Some("Cafe Lux"));
    }

    #[tokio::test]
    async fn test_every_saved_item_is_queryable_by_name() {
        let catalog = catalog().await;
        for name in ["Flat White", "Oolong", "Rye Bread", "Stout"] {
            let id = catalog.save_item(NewItem::named(name)).await.unwrap();
            assert!(catalog.query(name).contains(&id));
            assert!(catalog.query(&name[1..3]).contains(&id));
        }
    }

    #[tokio::test]
    async fn test_deleted_item_disappears_everywhere() {
        let catalog = catalog().await;
        let keep = catalog.save_item(NewItem::named("Keep")).await.unwrap();
        let gone = catalog.save_item(NewItem::named("Gone")).await.unwrap();

        catalog.delete_item(gone).await.unwrap();
        assert!(!catalog.query("").contains(&gone));
        assert!(catalog.query("gone").is_empty());
        let listed: Vec<i64> = catalog.db().list_items().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(listed, vec![keep]);
        assert!(catalog.delete_item(gone).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_item_cascades_to_photos() {
        let catalog = catalog().await;
        let first = catalog.photos().attach(&jpeg_payload(30, 20), None).await.unwrap();
        let second = catalog.photos().attach(&jpeg_payload(20, 30), None).await.unwrap();

        let item = NewItem {
            name: "Croissant".to_string(),
            photos: vec![first.clone(), second.clone()],
            ..Default::default()
        };
        let id = catalog.save_item(item).await.unwrap();
        assert_eq!(catalog.db().find_photos_by_item(Some(id)).await.unwrap().len(), 2);
        assert!(catalog.db().find_photos_by_item(None).await.unwrap().is_empty());

        catalog.delete_item(id).await.unwrap();
        let ids = vec![first, second];
        assert!(catalog.db().get_photos(&ids).await.unwrap().is_empty());
        assert_eq!(catalog.photos().reclaim_orphans().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_item_detaches_dropped_photos() {
        let catalog = catalog().await;
        let kept = catalog.photos().attach(&jpeg_payload(10, 10), None).await.unwrap();
        let dropped = catalog.photos().attach(&jpeg_payload(10, 10), None).await.unwrap();
        let id = catalog
            .save_item(NewItem {
                name: "Scone".to_string(),
                photos: vec![kept.clone(), dropped.clone()],
                ..Default::default()
            })
            .await
            .unwrap();

        let added = catalog.photos().attach(&jpeg_payload(10, 10), None).await.unwrap();
        let patch = ItemPatch {
            photos: Some(vec![kept.clone(), added.clone()]),
            ..Default::default()
        };
        catalog.update_item(id, patch).await.unwrap();

        assert!(catalog.db().get_photo(&dropped).await.unwrap().is_none());
        let owned = catalog.db().find_photos_by_item(Some(id)).await.unwrap();
        let mut owned_ids: Vec<String> = owned.into_iter().map(|p| p.id).collect();
        owned_ids.sort();
        let mut expected = vec![kept, added];
        expected.sort();
        assert_eq!(owned_ids, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_and_readers_agree() {
        let catalog = Arc::new(catalog().await);

        let mut writers = Vec::new();
        for task in 0..6 {
            let catalog = catalog.clone();
            writers.push(tokio::spawn(async move {
                let mut kept = Vec::new();
                for round in 0..20 {
                    let photo = catalog.photos().attach(&jpeg_payload(8, 8), None).await.unwrap();
                    let item = NewItem {
                        name: format!("Task {} item {}", task, round),
                        photos: vec![photo.clone()],
                        ..Default::default()
                    };
                    let id = catalog.save_item(item).await.unwrap();
                    assert!(catalog.query("").contains(&id));

                    if round % 2 == 0 {
                        catalog.delete_item(id).await.unwrap();
                        assert!(!catalog.query("").contains(&id));
                    } else {
                        kept.push((id, photo));
                    }
                }
                kept
            }));
        }

        let reclaimer = {
            let catalog = catalog.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    catalog.photos().reclaim_orphans().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut kept = Vec::new();
        for writer in writers {
            kept.extend(writer.await.unwrap());
        }
        reclaimer.await.unwrap();

        let mut written: Vec<i64> = kept.iter().map(|(id, _)| *id).collect();
        written.sort_unstable();
        assert_eq!(catalog.query(""), written);
        let stored: Vec<i64> = catalog.db().list_items().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(stored, written);

        for (id, photo) in &kept {
            let stored = catalog.db().get_photo(photo).await.unwrap().unwrap();
            assert_eq!(stored.item_id, Some(*id));
        }
        assert_eq!(catalog.db().count_photos().await.unwrap(), kept.len() as i64);
    }

    #[tokio::test]
    async fn test_place_delete_keeps_items() {
        let catalog = catalog().await;
        let place = catalog.create_place(NewPlace::named("Corner Shop")).await.unwrap();
        let id = catalog
            .save_item(NewItem {
                name: "Milk".to_string(),
                place: Some("Corner Shop".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        catalog.delete_place(place).await.unwrap();
        let item = catalog.db().get_item(id).await.unwrap().unwrap();
        assert_eq!(item.place.as_deref(), Some("Corner Shop"));
        assert_eq!(
            catalog.stats().await.unwrap(),
            CatalogStats { items: 1, places: 0, photos: 0 }
        );
    }

    #[tokio::test]
    async fn test_open_builds_index_from_disk() {
        let dir = tempdir().unwrap();
        let config = Config {
            db_path: dir.path().join("catalog.db"),
            photos: PhotoConfig::default(),
        };
        let id = {
            let catalog = Catalog::open(&config).await.unwrap();
            catalog.save_item(NewItem::named("Matcha")).await.unwrap()
        };

        let catalog = Catalog::open(&config).await.unwrap();
        assert_eq!(catalog.query("matcha"), vec![id]);
    }
}
