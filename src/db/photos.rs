//! Types for stored photos.

use chrono::{DateTime, Utc};
use std::fmt;

/// A stored photo: a downscaled JPEG, its thumbnail and the owning item.
///
/// `item_id` is `None` while the owning item is still being composed.
#[derive(Clone, PartialEq, Eq)]
pub struct Photo {
    pub id: String,
    pub image: Vec<u8>,
    pub thumbnail: Vec<u8>,
    pub item_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Photo")
            .field("id", &self.id)
            .field("image", &format_args!("{} bytes", self.image.len()))
            .field("thumbnail", &format_args!("{} bytes", self.thumbnail.len()))
            .field("item_id", &self.item_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A photo's identity and ownership, without its payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub id: String,
    pub item_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhotoPatch {
    pub item_id: Option<Option<i64>>,
}

impl PhotoPatch {
    pub fn owner(item_id: i64) -> Self {
        Self {
            item_id: Some(Some(item_id)),
        }
    }

    pub(crate) fn apply(self, photo: &mut Photo) {
        if let Some(item_id) = self.item_id {
            photo.item_id = item_id;
        }
    }
}
