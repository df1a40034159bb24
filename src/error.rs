//! Error types shared by the store, codec, photo and import/export layers.

use std::fmt;

/// The record collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Items,
    Places,
    Photos,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Items => "items",
            Collection::Places => "places",
            Collection::Photos => "photos",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation targets an identity that is not in the collection.
    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: String },

    /// The image payload could not be decoded.
    #[error("failed to decode image payload: {0}")]
    Decode(String),

    /// The storage engine could not be opened or migrated.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The import document is missing its required shape.
    #[error("invalid import document: {0}")]
    ImportFormat(String),

    /// A record failed validation before being written.
    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(collection: Collection, id: impl ToString) -> Self {
        Error::NotFound {
            collection,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found(Collection::Photos, "photo_1_abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "photos record not found: photo_1_abc");
    }
}
