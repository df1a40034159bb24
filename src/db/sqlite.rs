//! SQLite backend implementation.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use super::items::{Item, ItemKey, ItemPatch, NewItem};
use super::photos::{Photo, PhotoPatch, PhotoRef};
use super::places::{NewPlace, Place, PlacePatch};
use super::schema::{MIGRATIONS, SCHEMA_VERSION};
use super::{from_millis, to_millis};
use crate::error::{Collection, Error, Result};

const ITEM_COLUMNS: &str =
    "id, name, notes, item_type, sub_type, rating, place, photos, created_at, updated_at";
const PLACE_COLUMNS: &str = "id, name, created_at, updated_at";
const PHOTO_COLUMNS: &str = "id, image, thumbnail, item_id, created_at";

pub struct SqliteDb {
    pub(crate) conn: Connection,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Enable constraints and bring the schema up to [`SCHEMA_VERSION`].
    /// Returns the version the store is at afterwards.
    pub fn initialize(&mut self) -> Result<u32> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.run_migrations()
    }

    pub fn schema_version(&self) -> Result<u32> {
        let version: u32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    fn run_migrations(&mut self) -> Result<u32> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            warn!(
                "Store schema version {} is newer than supported version {}",
                current, SCHEMA_VERSION
            );
            return Ok(current);
        }

        for (version, ddl) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            let tx = self.conn.transaction()?;
            tx.execute_batch(ddl)?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
            info!("Migrated store schema to version {}", version);
        }

        self.schema_version()
    }

    // ========================================================================
    // Item operations
    // ========================================================================

    pub fn insert_item(&mut self, item: NewItem, now: DateTime<Utc>) -> Result<Item> {
        let mut item = item;
        item.validate()?;
        let photos_json = serde_json::to_string(&item.photos)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO items (name, notes, item_type, sub_type, rating, place, photos, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                item.name,
                item.notes,
                item.item_type,
                item.sub_type,
                item.rating,
                item.place,
                photos_json,
                to_millis(now),
            ],
        )?;
        let id = tx.last_insert_rowid();
        write_barcodes(&tx, id, &item.barcodes)?;
        tx.commit()?;

        Ok(Item {
            id,
            name: item.name,
            notes: item.notes,
            item_type: item.item_type,
            sub_type: item.sub_type,
            rating: item.rating,
            barcodes: item.barcodes,
            place: item.place,
            photos: item.photos,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_item(&mut self, id: i64, patch: ItemPatch, now: DateTime<Utc>) -> Result<Item> {
        let tx = self.conn.transaction()?;
        let mut item = load_item(&tx, id)?.ok_or_else(|| Error::not_found(Collection::Items, id))?;
        patch.apply(&mut item)?;
        item.updated_at = now.max(item.updated_at).max(item.created_at);

        tx.execute(
            r#"
            UPDATE items
            SET name = ?1, notes = ?2, item_type = ?3, sub_type = ?4, rating = ?5,
                place = ?6, photos = ?7, updated_at = ?8
            WHERE id = ?9
            "#,
            params![
                item.name,
                item.notes,
                item.item_type,
                item.sub_type,
                item.rating,
                item.place,
                serde_json::to_string(&item.photos)?,
                to_millis(item.updated_at),
                id,
            ],
        )?;
        tx.execute("DELETE FROM item_barcodes WHERE item_id = ?", [id])?;
        write_barcodes(&tx, id, &item.barcodes)?;
        tx.commit()?;

        Ok(item)
    }

    pub fn delete_item(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM item_barcodes WHERE item_id = ?", [id])?;
        let removed = tx.execute("DELETE FROM items WHERE id = ?", [id])?;
        if removed == 0 {
            return Err(Error::not_found(Collection::Items, id));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_item(&self, id: i64) -> Result<Option<Item>> {
        load_item(&self.conn, id)
    }

    pub fn list_items(&self) -> Result<Vec<Item>> {
        query_items(
            &self.conn,
            &format!("SELECT {} FROM items ORDER BY id", ITEM_COLUMNS),
            &[],
        )
    }

    pub fn get_items(&self, ids: &[i64]) -> Result<Vec<Item>> {
        let mut items = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(item) = load_item(&self.conn, id)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    pub fn find_items(&self, key: &ItemKey) -> Result<Vec<Item>> {
        let (sql, value): (String, Box<dyn ToSql>) = match key {
            ItemKey::Barcode(barcode) => (
                format!(
                    "SELECT {} FROM items WHERE id IN \
                     (SELECT item_id FROM item_barcodes WHERE barcode = ?) ORDER BY id",
                    ITEM_COLUMNS
                ),
                Box::new(barcode.clone()),
            ),
            ItemKey::Name(name) => (item_where("name"), Box::new(name.clone())),
            ItemKey::Type(item_type) => (item_where("item_type"), Box::new(item_type.clone())),
            ItemKey::Rating(rating) => (item_where("rating"), Box::new(*rating)),
            ItemKey::Place(place) => (item_where("place"), Box::new(place.clone())),
        };
        query_items(&self.conn, &sql, &[value.as_ref()])
    }

    pub fn count_items(&self) -> Result<i64> {
        count(&self.conn, "items")
    }

    // ========================================================================
    // Place operations
    // ========================================================================

    pub fn insert_place(&mut self, place: NewPlace, now: DateTime<Utc>) -> Result<Place> {
        self.conn.execute(
            "INSERT INTO places (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![place.name, to_millis(now)],
        )?;
        Ok(Place {
            id: self.conn.last_insert_rowid(),
            name: place.name,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_place(&mut self, id: i64, patch: PlacePatch, now: DateTime<Utc>) -> Result<Place> {
        let tx = self.conn.transaction()?;
        let mut place = load_place(&tx, id)?.ok_or_else(|| Error::not_found(Collection::Places, id))?;
        patch.apply(&mut place);
        place.updated_at = now.max(place.updated_at).max(place.created_at);
        tx.execute(
            "UPDATE places SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![place.name, to_millis(place.updated_at), id],
        )?;
        tx.commit()?;
        Ok(place)
    }

    pub fn delete_place(&mut self, id: i64) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM places WHERE id = ?", [id])?;
        if removed == 0 {
            return Err(Error::not_found(Collection::Places, id));
        }
        Ok(())
    }

    pub fn get_place(&self, id: i64) -> Result<Option<Place>> {
        load_place(&self.conn, id)
    }

    pub fn list_places(&self) -> Result<Vec<Place>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM places ORDER BY id", PLACE_COLUMNS))?;
        let places = stmt
            .query_map([], place_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(places)
    }

    pub fn get_places(&self, ids: &[i64]) -> Result<Vec<Place>> {
        let mut places = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(place) = load_place(&self.conn, id)? {
                places.push(place);
            }
        }
        Ok(places)
    }

    pub fn find_places_by_name(&self, name: &str) -> Result<Vec<Place>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM places WHERE name = ? ORDER BY id",
            PLACE_COLUMNS
        ))?;
        let places = stmt
            .query_map([name], place_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(places)
    }

    pub fn count_places(&self) -> Result<i64> {
        count(&self.conn, "places")
    }

    // ========================================================================
    // Photo operations
    // ========================================================================

    pub fn insert_photo(&mut self, photo: &Photo) -> Result<()> {
        self.conn.execute(
            "INSERT INTO photos (id, image, thumbnail, item_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                photo.id,
                photo.image,
                photo.thumbnail,
                photo.item_id,
                to_millis(photo.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_photo(&mut self, id: &str, patch: PhotoPatch) -> Result<Photo> {
        let tx = self.conn.transaction()?;
        let mut photo = load_photo(&tx, id)?.ok_or_else(|| Error::not_found(Collection::Photos, id))?;
        patch.apply(&mut photo);
        tx.execute(
            "UPDATE photos SET item_id = ?1 WHERE id = ?2",
            params![photo.item_id, id],
        )?;
        tx.commit()?;
        Ok(photo)
    }

    pub fn delete_photo(&mut self, id: &str) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM photos WHERE id = ?", [id])?;
        if removed == 0 {
            return Err(Error::not_found(Collection::Photos, id));
        }
        Ok(())
    }

    /// Delete a photo only if it is still an orphan at the moment of the
    /// delete: ownerless and created no later than `stale_before`, or owned by an
    /// item that no longer exists. Returns whether a row was removed.
    pub fn delete_photo_if_orphaned(&mut self, id: &str, stale_before: DateTime<Utc>) -> Result<bool> {
        let removed = self.conn.execute(
            r#"
            DELETE FROM photos
            WHERE id = ?1
              AND ((item_id IS NULL AND created_at <= ?2)
                OR (item_id IS NOT NULL
                    AND NOT EXISTS (SELECT 1 FROM items WHERE items.id = photos.item_id)))
            "#,
            params![id, to_millis(stale_before)],
        )?;
        Ok(removed > 0)
    }

    pub fn get_photo(&self, id: &str) -> Result<Option<Photo>> {
        load_photo(&self.conn, id)
    }

    pub fn list_photos(&self) -> Result<Vec<Photo>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM photos ORDER BY created_at, id", PHOTO_COLUMNS))?;
        let photos = stmt
            .query_map([], photo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// Identity, owner and age of every photo, without the payloads.
    pub fn list_photo_refs(&self) -> Result<Vec<PhotoRef>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, item_id, created_at FROM photos ORDER BY created_at, id")?;
        let refs = stmt
            .query_map([], |row| {
                Ok(PhotoRef {
                    id: row.get(0)?,
                    item_id: row.get(1)?,
                    created_at: from_millis(row.get(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    pub fn get_photos(&self, ids: &[String]) -> Result<Vec<Photo>> {
        let mut photos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(photo) = load_photo(&self.conn, id)? {
                photos.push(photo);
            }
        }
        Ok(photos)
    }

    /// Photos owned by `item_id`; `None` finds ownerless photos.
    pub fn find_photos_by_item(&self, item_id: Option<i64>) -> Result<Vec<Photo>> {
        let sql = match item_id {
            Some(_) => format!(
                "SELECT {} FROM photos WHERE item_id = ? ORDER BY created_at, id",
                PHOTO_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM photos WHERE item_id IS NULL ORDER BY created_at, id",
                PHOTO_COLUMNS
            ),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match item_id {
            Some(id) => stmt.query_map([id], photo_from_row)?,
            None => stmt.query_map([], photo_from_row)?,
        };
        let photos = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    pub fn count_photos(&self) -> Result<i64> {
        count(&self.conn, "photos")
    }
}

fn item_where(column: &str) -> String {
    format!(
        "SELECT {} FROM items WHERE {} = ? ORDER BY id",
        ITEM_COLUMNS, column
    )
}

fn count(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

fn write_barcodes(conn: &Connection, item_id: i64, barcodes: &BTreeSet<String>) -> Result<()> {
    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO item_barcodes (item_id, barcode) VALUES (?1, ?2)")?;
    for barcode in barcodes {
        stmt.execute(params![item_id, barcode])?;
    }
    Ok(())
}

fn load_barcodes(conn: &Connection, item_id: i64) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached("SELECT barcode FROM item_barcodes WHERE item_id = ?")?;
    let barcodes = stmt
        .query_map([item_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(barcodes)
}

fn load_item(conn: &Connection, id: i64) -> Result<Option<Item>> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS),
            [id],
            item_from_row,
        )
        .optional()?;
    match item {
        Some(mut item) => {
            item.barcodes = load_barcodes(conn, item.id)?;
            Ok(Some(item))
        }
        None => Ok(None),
    }
}

fn query_items(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(sql)?;
    let mut items = stmt
        .query_map(params, item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for item in &mut items {
        item.barcodes = load_barcodes(conn, item.id)?;
    }
    Ok(items)
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    let photos_json: String = row.get(7)?;
    let photos: Vec<String> = serde_json::from_str(&photos_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        notes: row.get(2)?,
        item_type: row.get(3)?,
        sub_type: row.get(4)?,
        rating: row.get(5)?,
        barcodes: BTreeSet::new(),
        place: row.get(6)?,
        photos,
        created_at: from_millis(row.get(8)?),
        updated_at: from_millis(row.get(9)?),
    })
}

fn load_place(conn: &Connection, id: i64) -> Result<Option<Place>> {
    let place = conn
        .query_row(
            &format!("SELECT {} FROM places WHERE id = ?", PLACE_COLUMNS),
            [id],
            place_from_row,
        )
        .optional()?;
    Ok(place)
}

fn place_from_row(row: &Row) -> rusqlite::Result<Place> {
    Ok(Place {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: from_millis(row.get(2)?),
        updated_at: from_millis(row.get(3)?),
    })
}

fn load_photo(conn: &Connection, id: &str) -> Result<Option<Photo>> {
    let photo = conn
        .query_row(
            &format!("SELECT {} FROM photos WHERE id = ?", PHOTO_COLUMNS),
            [id],
            photo_from_row,
        )
        .optional()?;
    Ok(photo)
}

fn photo_from_row(row: &Row) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        image: row.get(1)?,
        thumbnail: row.get(2)?,
        item_id: row.get(3)?,
        created_at: from_millis(row.get(4)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(ms: i64) -> DateTime<Utc> {
        from_millis(ms)
    }

    fn open() -> SqliteDb {
        let mut db = SqliteDb::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut db = open();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
        assert_eq!(db.initialize().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_upgrade_from_v1_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let db = SqliteDb::open(&path).unwrap();
            db.conn.execute_batch(MIGRATIONS[0].1).unwrap();
            db.conn.pragma_update(None, "user_version", 1).unwrap();
            db.conn
                .execute(
                    "INSERT INTO items (name, created_at, updated_at) VALUES ('Old', 1, 1)",
                    [],
                )
                .unwrap();
        }

        let mut db = SqliteDb::open(&path).unwrap();
        assert_eq!(db.initialize().unwrap(), SCHEMA_VERSION);
        let items = db.list_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Old");
        assert_eq!(db.count_photos().unwrap(), 0);
    }

    #[test]
    fn test_item_crud_and_secondary_keys() {
        let mut db = open();
        let item = NewItem {
            name: "Latte".to_string(),
            rating: 5,
            place: Some("Cafe Lux".to_string()),
            item_type: Some("drink".to_string()),
            ..Default::default()
        }
        .with_barcode("012345");
        let created = db.insert_item(item, at(1_000)).unwrap();
        db.insert_item(NewItem::named("Mocha"), at(1_001)).unwrap();

        assert_eq!(db.get_item(created.id).unwrap(), Some(created.clone()));
        assert_eq!(db.find_items(&ItemKey::Barcode("012345".into())).unwrap().len(), 1);
        assert_eq!(db.find_items(&ItemKey::Name("Latte".into())).unwrap().len(), 1);
        assert_eq!(db.find_items(&ItemKey::Type("drink".into())).unwrap().len(), 1);
        assert_eq!(db.find_items(&ItemKey::Rating(5)).unwrap().len(), 1);
        assert_eq!(db.find_items(&ItemKey::Place("Cafe Lux".into())).unwrap().len(), 1);
        assert!(db.find_items(&ItemKey::Name("latte".into())).unwrap().is_empty());

        db.delete_item(created.id).unwrap();
        assert_eq!(db.get_item(created.id).unwrap(), None);
        assert!(db.find_items(&ItemKey::Barcode("012345".into())).unwrap().is_empty());
        assert!(db.delete_item(created.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_item_stamps_monotonically() {
        let mut db = open();
        let created = db.insert_item(NewItem::named("Tea"), at(5_000)).unwrap();

        let patch = ItemPatch {
            notes: Some("green".to_string()),
            barcodes: Some(["999".to_string()].into_iter().collect()),
            ..Default::default()
        };
        // A clock that went backwards must not move updated_at before created_at.
        let updated = db.update_item(created.id, patch, at(4_000)).unwrap();
        assert_eq!(updated.created_at, at(5_000));
        assert!(updated.updated_at >= updated.created_at);
        assert_eq!(updated.notes, "green");

        let reloaded = db.get_item(created.id).unwrap().unwrap();
        assert_eq!(reloaded, updated);
        assert_eq!(db.find_items(&ItemKey::Barcode("999".into())).unwrap().len(), 1);
    }

    #[test]
    fn test_update_missing_item_fails() {
        let mut db = open();
        let err = db.update_item(42, ItemPatch::default(), at(1)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_rating_writes_nothing() {
        let mut db = open();
        let item = NewItem {
            name: "Too good".to_string(),
            rating: 6,
            ..Default::default()
        };
        assert!(matches!(db.insert_item(item, at(1)), Err(Error::Invalid(_))));
        assert_eq!(db.count_items().unwrap(), 0);
    }

    #[test]
    fn test_get_items_omits_missing() {
        let mut db = open();
        let a = db.insert_item(NewItem::named("A"), at(1)).unwrap();
        let b = db.insert_item(NewItem::named("B"), at(2)).unwrap();
        let items = db.get_items(&[b.id, 999, a.id]).unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_places_do_not_cascade() {
        let mut db = open();
        let place = db.insert_place(NewPlace::named("Cafe Lux"), at(1)).unwrap();
        let item = NewItem {
            name: "Latte".to_string(),
            place: Some("Cafe Lux".to_string()),
            ..Default::default()
        };
        db.insert_item(item, at(2)).unwrap();

        let renamed = db
            .update_place(place.id, PlacePatch { name: Some("Lux".into()) }, at(3))
            .unwrap();
        assert_eq!(renamed.name, "Lux");
        assert_eq!(db.find_places_by_name("Lux").unwrap().len(), 1);

        db.delete_place(place.id).unwrap();
        assert_eq!(db.count_places().unwrap(), 0);
        assert_eq!(db.count_items().unwrap(), 1);
    }

    #[test]
    fn test_conditional_orphan_delete() {
        let mut db = open();
        let owner = db.insert_item(NewItem::named("Owner"), at(1)).unwrap();
        let photo = |id: &str, item_id: Option<i64>, ms: i64| Photo {
            id: id.to_string(),
            image: vec![1, 2, 3],
            thumbnail: vec![4],
            item_id,
            created_at: at(ms),
        };
        db.insert_photo(&photo("fresh", None, 100)).unwrap();
        db.insert_photo(&photo("stale", None, 10)).unwrap();
        db.insert_photo(&photo("owned", Some(owner.id), 10)).unwrap();
        db.insert_photo(&photo("dangling", Some(owner.id + 1), 10)).unwrap();

        let cutoff = at(50);
        assert!(!db.delete_photo_if_orphaned("fresh", cutoff).unwrap());
        assert!(db.delete_photo_if_orphaned("stale", cutoff).unwrap());
        assert!(!db.delete_photo_if_orphaned("owned", cutoff).unwrap());
        assert!(db.delete_photo_if_orphaned("dangling", cutoff).unwrap());
        assert_eq!(db.find_photos_by_item(None).unwrap().len(), 1);
        assert_eq!(db.find_photos_by_item(Some(owner.id)).unwrap().len(), 1);
    }
}
