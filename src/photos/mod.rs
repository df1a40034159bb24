//! Photo lifecycle: capture, ownership, hydration and garbage collection.
//!
//! Photos are written as soon as they are captured, often before the item
//! that will own them has been saved. That makes ownerless photos a normal
//! state, and abandoned ones garbage that [`PhotoManager::reclaim_orphans`]
//! collects.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec::{self, Blob};
use crate::config::PhotoConfig;
use crate::db::{self, Database, Photo, PhotoPatch, PhotoRef};
use crate::error::Result;

const ID_TOKEN_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_GRACE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// A thumbnail ready for a gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoThumbnail {
    pub id: String,
    pub thumbnail: Vec<u8>,
}

/// `photo_<unix millis>_<9 base36 chars>`: sorts by creation time, and the
/// random token keeps ids unique within a millisecond.
pub fn generate_photo_id() -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..ID_TOKEN_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("photo_{}_{}", Utc::now().timestamp_millis(), token)
}

pub struct PhotoManager {
    db: Arc<Database>,
    config: PhotoConfig,
}

impl PhotoManager {
    pub fn new(db: Arc<Database>, config: PhotoConfig) -> Self {
        Self { db, config }
    }

    /// Store a captured image payload. The full image is downscaled and a
    /// thumbnail derived before anything is written, so a payload that does
    /// not decode leaves no record behind.
    pub async fn attach(&self, payload: &str, owner: Option<i64>) -> Result<String> {
        let blob = codec::decode(payload)?;
        self.attach_blob(&blob, owner).await
    }

    pub async fn attach_blob(&self, blob: &Blob, owner: Option<i64>) -> Result<String> {
        let image = codec::downscale_bytes(&blob.bytes, self.config.downscale())?;
        let thumbnail = codec::thumbnail_bytes(&blob.bytes, self.config.thumbnail())?;

        let photo = Photo {
            id: generate_photo_id(),
            image,
            thumbnail,
            item_id: owner,
            created_at: db::now(),
        };
        self.db.create_photo(&photo).await
    }

    /// Bind a photo to the item that now owns it.
    pub async fn reassign_owner(&self, photo_id: &str, item_id: i64) -> Result<()> {
        self.db.update_photo(photo_id, PhotoPatch::owner(item_id)).await?;
        debug!(photo_id, item_id, "photo owner assigned");
        Ok(())
    }

    pub async fn detach(&self, photo_id: &str) -> Result<()> {
        self.db.delete_photo(photo_id).await?;
        debug!(photo_id, "photo detached");
        Ok(())
    }

    /// Detach every photo in `photo_ids`. Photos that are already gone are
    /// skipped. Returns how many were removed.
    pub async fn detach_all(&self, photo_ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in photo_ids {
            match self.detach(id).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Thumbnails for `photo_ids`, in order, skipping ids that are not stored.
    pub async fn load_thumbnails(&self, photo_ids: &[String]) -> Result<Vec<PhotoThumbnail>> {
        let photos = self.db.get_photos(photo_ids).await?;
        Ok(photos
            .into_iter()
            .map(|photo| PhotoThumbnail {
                id: photo.id,
                thumbnail: photo.thumbnail,
            })
            .collect())
    }

    /// Full-size image bytes for one photo.
    pub async fn load_image(&self, photo_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_photo(photo_id).await?.map(|photo| photo.image))
    }

    /// Delete photos whose owner is gone, and ownerless photos older than the
    /// grace period. Each delete re-checks the condition in the store, so a
    /// photo adopted while the scan runs is kept. Returns the number deleted.
    pub async fn reclaim_orphans(&self) -> Result<usize> {
        let stale_before = self.stale_before();
        let candidates = self.db.list_photo_refs().await?;
        let mut reclaimed = 0;
        let mut failed = 0;

        for photo in &candidates {
            match self.reclaim_if_orphaned(photo, stale_before).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to reclaim photo {}: {}", photo.id, e);
                    failed += 1;
                }
            }
        }

        info!("Reclaimed {} orphaned photos ({} failed)", reclaimed, failed);
        Ok(reclaimed)
    }

    fn stale_before(&self) -> DateTime<Utc> {
        let grace = Duration::seconds(self.config.orphan_grace_secs.min(MAX_GRACE_SECS) as i64);
        db::now().checked_sub_signed(grace).unwrap_or_default()
    }

    /// `photo` is a snapshot taken at scan time; the store decides.
    async fn reclaim_if_orphaned(&self, photo: &PhotoRef, stale_before: DateTime<Utc>) -> Result<bool> {
        if photo.item_id.is_none() && photo.created_at > stale_before {
            return Ok(false);
        }
        let removed = self.db.delete_photo_if_orphaned(&photo.id, stale_before).await?;
        if removed {
            debug!(photo_id = %photo.id, item_id = ?photo.item_id, "orphaned photo reclaimed");
        }
        Ok(removed)
    }
}
