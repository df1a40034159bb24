//! Whole-catalog import and export.
//!
//! An export document is self-contained: each item carries its photos as
//! inline data URLs rather than photo ids. Imports assign fresh identities
//! and re-attach the inline photos through the photo manager.

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::codec::{self, Blob};
use crate::db::{Item, ItemKey, ItemPatch, NewItem, MAX_RATING};
use crate::error::{Error, Result};

/// Version written into export documents. Imports accept any version.
pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub item_count: usize,
    pub items: Vec<ItemDto>,
}

/// An item as it appears in a document, with photos inlined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemDto {
    pub id: Option<i64>,
    pub name: String,
    pub notes: String,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub sub_type: Option<String>,
    #[serde(deserialize_with = "lenient_rating")]
    pub rating: u8,
    #[serde(alias = "barcode", deserialize_with = "one_or_many")]
    pub barcodes: Vec<String>,
    pub place: Option<String>,
    /// Inline image payloads (data URLs).
    pub photos: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ItemDto {
    fn from_item(item: Item, photos: Vec<String>) -> Self {
        Self {
            id: Some(item.id),
            name: item.name,
            notes: item.notes,
            item_type: item.item_type,
            sub_type: item.sub_type,
            rating: item.rating,
            barcodes: item.barcodes.into_iter().collect(),
            place: item.place,
            photos,
            created_at: Some(item.created_at),
            updated_at: Some(item.updated_at),
        }
    }

    fn to_new_item(&self) -> NewItem {
        NewItem {
            name: self.name.clone(),
            notes: self.notes.clone(),
            item_type: self.item_type.clone(),
            sub_type: self.sub_type.clone(),
            rating: self.rating,
            barcodes: self.barcodes.iter().cloned().collect(),
            place: self.place.clone(),
            photos: Vec::new(),
        }
    }
}

/// Ratings from other versions may be fractional, out of range, written as
/// strings or missing. Values that cannot be read as a number map to 0.
fn lenient_rating<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u8, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RatingValue {
        Number(f64),
        Text(String),
        Other(IgnoredAny),
    }

    let value = match Option::<RatingValue>::deserialize(deserializer)? {
        Some(RatingValue::Number(n)) => Some(n),
        Some(RatingValue::Text(text)) => match text.trim().parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!("Unreadable rating {:?}, using 0", text);
                None
            }
        },
        Some(RatingValue::Other(_)) => {
            warn!("Rating is not a number or string, using 0");
            None
        }
        None => None,
    };
    Ok(clamp_rating(value))
}

fn clamp_rating(value: Option<f64>) -> u8 {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, MAX_RATING as f64) as u8)
        .unwrap_or(0)
}

/// Older documents carry a single `barcode` string.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(barcode)) => vec![barcode],
        Some(OneOrMany::Many(barcodes)) => barcodes,
        None => Vec::new(),
    })
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// Snapshot every item with its photos inlined.
pub async fn export_all(catalog: &Catalog) -> Result<ExportDocument> {
    let db = catalog.db();
    let items = db.list_items().await?;
    let mut dtos = Vec::with_capacity(items.len());

    for item in items {
        let photos = db
            .get_photos(&item.photos)
            .await?
            .into_iter()
            .map(|photo| codec::encode(&Blob::jpeg(photo.image)))
            .collect();
        dtos.push(ItemDto::from_item(item, photos));
    }

    Ok(ExportDocument {
        version: FORMAT_VERSION.to_string(),
        export_date: Utc::now(),
        item_count: dtos.len(),
        items: dtos,
    })
}

/// Import every item in `document`. Items sharing a barcode with a stored
/// item are skipped, as are items that cannot be read or written. A
/// document without an `items` array is rejected before anything is
/// written.
pub async fn import_all(catalog: &Catalog, document: &Value) -> Result<ImportReport> {
    let items = document
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::ImportFormat("document has no items array".to_string()))?;

    match document.get("version").and_then(Value::as_str) {
        Some(FORMAT_VERSION) => {}
        Some(other) => info!("Importing document format {} as {}", other, FORMAT_VERSION),
        None => info!("Importing document without a format version"),
    }

    let mut report = ImportReport::default();
    for (position, raw) in items.iter().enumerate() {
        match import_one(catalog, raw).await {
            Ok(true) => report.imported += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                warn!("Skipping document item {}: {}", position, e);
                report.skipped += 1;
            }
        }
    }

    info!(
        "Import finished: {} imported, {} skipped",
        report.imported, report.skipped
    );
    Ok(report)
}

/// Returns `Ok(false)` when the item duplicates a stored barcode. Once the
/// item is saved it counts as imported, even if its photos cannot be
/// restored.
async fn import_one(catalog: &Catalog, raw: &Value) -> Result<bool> {
    let dto = ItemDto::deserialize(raw)?;

    for barcode in dto.barcodes.iter().map(|b| b.trim()).filter(|b| !b.is_empty()) {
        let existing = catalog
            .db()
            .find_items(&ItemKey::Barcode(barcode.to_string()))
            .await?;
        if !existing.is_empty() {
            return Ok(false);
        }
    }

    let id = catalog.save_item(dto.to_new_item()).await?;
    if let Err(e) = restore_photos(catalog, id, &dto.photos).await {
        warn!("Imported item {} without its photos: {}", id, e);
    }
    Ok(true)
}

/// Attach inline photos to a freshly imported item. Payloads that do not
/// decode are dropped. If the item cannot take the photo list, the photos
/// attached here are removed again.
async fn restore_photos(catalog: &Catalog, id: i64, payloads: &[String]) -> Result<usize> {
    let mut photo_ids = Vec::with_capacity(payloads.len());
    for payload in payloads {
        match catalog.photos().attach(payload, Some(id)).await {
            Ok(photo_id) => photo_ids.push(photo_id),
            Err(e) => warn!("Dropping unreadable photo on imported item {}: {}", id, e),
        }
    }
    if photo_ids.is_empty() {
        return Ok(0);
    }

    let count = photo_ids.len();
    let patch = ItemPatch {
        photos: Some(photo_ids.clone()),
        ..Default::default()
    };
    if let Err(e) = catalog.db().update_item(id, patch).await {
        catalog.photos().detach_all(&photo_ids).await?;
        return Err(e);
    }
    Ok(count)
}

/// Read a document from disk. Malformed JSON is an import format error.
pub fn read_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| Error::ImportFormat(e.to_string()))
}

pub fn write_document(document: &ExportDocument, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

/// Write a flat item listing, without photos.
pub async fn export_csv(catalog: &Catalog, path: &Path) -> Result<usize> {
    let items = catalog.db().list_items().await?;
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "id",
        "name",
        "notes",
        "type",
        "sub_type",
        "rating",
        "barcodes",
        "place",
        "photo_count",
        "created_at",
        "updated_at",
    ])?;

    for item in &items {
        let barcodes: Vec<&str> = item.barcodes.iter().map(String::as_str).collect();
        wtr.write_record([
            &item.id.to_string(),
            &item.name,
            &item.notes,
            item.item_type.as_deref().unwrap_or(""),
            item.sub_type.as_deref().unwrap_or(""),
            &item.rating.to_string(),
            &barcodes.join(";"),
            item.place.as_deref().unwrap_or(""),
            &item.photos.len().to_string(),
            &item.created_at.to_rfc3339(),
            &item.updated_at.to_rfc3339(),
        ])?;
    }

    wtr.flush()?;
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::jpeg_payload;
    use crate::config::PhotoConfig;
    use serde_json::json;
    use tempfile::tempdir;

    async fn catalog() -> Catalog {
        Catalog::open_in_memory(PhotoConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_reimport_skips_duplicate_barcode() {
        let catalog = catalog().await;
        catalog
            .save_item(NewItem::named("Beans").with_barcode("012345"))
            .await
            .unwrap();

        let document = serde_json::to_value(export_all(&catalog).await.unwrap()).unwrap();
        let report = import_all(&catalog, &document).await.unwrap();
        assert_eq!(report, ImportReport { imported: 0, skipped: 1 });
        assert_eq!(catalog.db().count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_export_import_moves_photos() {
        let source = catalog().await;
        let photo = source.photos().attach(&jpeg_payload(64, 48), None).await.unwrap();
        let original = source
            .save_item(NewItem {
                name: "Latte".to_string(),
                rating: 5,
                photos: vec![photo],
                ..Default::default()
            })
            .await
            .unwrap();

        let exported = export_all(&source).await.unwrap();
        assert_eq!(exported.version, FORMAT_VERSION);
        assert_eq!(exported.item_count, 1);
        assert_eq!(exported.items[0].id, Some(original));
        assert!(exported.items[0].photos[0].starts_with("data:image/jpeg;base64,"));

        let target = catalog().await;
        target.save_item(NewItem::named("Already here")).await.unwrap();
        let document = serde_json::to_value(&exported).unwrap();
        let report = import_all(&target, &document).await.unwrap();
        assert_eq!(report, ImportReport { imported: 1, skipped: 0 });

        let ids = target.query("latte");
        assert_eq!(ids.len(), 1);
        let item = target.db().get_item(ids[0]).await.unwrap().unwrap();
        assert_ne!(Some(item.id), exported.items[0].id);
        assert_eq!(item.rating, 5);
        assert_eq!(item.photos.len(), 1);
        let owned = target.db().find_photos_by_item(Some(item.id)).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id, item.photos[0]);
    }

    #[tokio::test]
    async fn test_missing_items_array_writes_nothing() {
        let catalog = catalog().await;
        for document in [json!({ "version": "1.0" }), json!({ "items": "nope" }), json!([])] {
            let err = import_all(&catalog, &document).await.unwrap_err();
            assert!(matches!(err, Error::ImportFormat(_)));
        }
        assert_eq!(catalog.db().count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_foreign_documents_import_best_effort() {
        let catalog = catalog().await;
        let document = json!({
            "version": "9.9",
            "items": [
                { "name": "Legacy", "barcode": "777", "rating": 4.6, "futureField": true },
                { "name": "Broken photo", "photos": ["data:image/jpeg;base64,AAAA"] },
                { "notes": "no name", "barcodes": ["888"] },
                { "name": "Text rating", "rating": "4" },
                { "name": "Odd rating", "rating": [1] },
                42,
                { "name": "Same barcode", "barcodes": ["777"] }
            ]
        });

        let report = import_all(&catalog, &document).await.unwrap();
        assert_eq!(report, ImportReport { imported: 5, skipped: 2 });

        let legacy = catalog
            .db()
            .find_items(&ItemKey::Barcode("777".to_string()))
            .await
            .unwrap();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].name, "Legacy");
        assert_eq!(legacy[0].rating, 5);

        let nameless = catalog
            .db()
            .find_items(&ItemKey::Barcode("888".to_string()))
            .await
            .unwrap();
        assert_eq!(nameless.len(), 1);
        assert_eq!(nameless[0].name, "");
        assert_eq!(nameless[0].notes, "no name");

        let text = catalog.search("text rating").await.unwrap();
        assert_eq!(text[0].rating, 4);
        let odd = catalog.search("odd rating").await.unwrap();
        assert_eq!(odd[0].rating, 0);

        let broken = catalog.search("broken photo").await.unwrap();
        assert_eq!(broken.len(), 1);
        assert!(broken[0].photos.is_empty());
        assert_eq!(catalog.db().count_photos().await.unwrap(), 0);
    }

    #[test]
    fn test_rating_mapping() {
        let rating = |raw: Value| ItemDto::deserialize(&json!({ "rating": raw })).unwrap().rating;
        assert_eq!(rating(json!(3)), 3);
        assert_eq!(rating(json!(2.5)), 3);
        assert_eq!(rating(json!(" 4 ")), 4);
        assert_eq!(rating(json!("4.4")), 4);
        assert_eq!(rating(json!(9)), MAX_RATING);
        assert_eq!(rating(json!(-2)), 0);
        assert_eq!(rating(json!("great")), 0);
        assert_eq!(rating(json!(null)), 0);
        assert_eq!(rating(json!({ "stars": 5 })), 0);
    }

    #[tokio::test]
    async fn test_failed_photo_restore_leaves_no_photos() {
        let catalog = catalog().await;
        let err = restore_photos(&catalog, 404, &[jpeg_payload(16, 16)]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(catalog.db().count_photos().await.unwrap(), 0);

        let id = catalog.save_item(NewItem::named("Bagel")).await.unwrap();
        let restored = restore_photos(&catalog, id, &[jpeg_payload(16, 16), "data:,".to_string()])
            .await
            .unwrap();
        assert_eq!(restored, 1);
        let item = catalog.db().get_item(id).await.unwrap().unwrap();
        assert_eq!(item.photos.len(), 1);
    }

    #[tokio::test]
    async fn test_document_files() {
        let dir = tempdir().unwrap();
        let catalog = catalog().await;
        catalog
            .save_item(NewItem::named("Stout").with_barcode("42"))
            .await
            .unwrap();

        let json_path = dir.path().join("export.json");
        write_document(&export_all(&catalog).await.unwrap(), &json_path).unwrap();
        let document = read_document(&json_path).unwrap();
        assert_eq!(document["itemCount"], 1);
        assert_eq!(document["items"][0]["barcodes"][0], "42");

        let bad_path = dir.path().join("bad.json");
        std::fs::write(&bad_path, "{ not json").unwrap();
        assert!(matches!(read_document(&bad_path), Err(Error::ImportFormat(_))));

        let csv_path = dir.path().join("items.csv");
        assert_eq!(export_csv(&catalog, &csv_path).await.unwrap(), 1);
        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv.starts_with("id,name,notes,type"));
        assert!(csv.contains("Stout"));
    }
}
