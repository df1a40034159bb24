//! Versioned schema for the catalog store.
//!
//! The on-disk version lives in `PRAGMA user_version`. Opening a store runs
//! every migration newer than that version, in order. Migrations are
//! additive and written with `IF NOT EXISTS` so re-running one is harmless.

/// Schema version this build expects.
pub const SCHEMA_VERSION: u32 = 3;

/// Ordered `(version, ddl)` pairs.
pub const MIGRATIONS: &[(u32, &str)] = &[
    (1, V1_ITEMS_AND_PLACES),
    (2, V2_PHOTOS),
    (3, V3_ITEM_LOOKUPS),
];

const V1_ITEMS_AND_PLACES: &str = r#"
-- Items: the catalog entries
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    item_type TEXT,
    sub_type TEXT,
    rating INTEGER NOT NULL DEFAULT 0,
    place TEXT,                        -- place name, not a foreign key
    photos TEXT NOT NULL DEFAULT '[]', -- JSON array of photo ids, in order
    created_at INTEGER NOT NULL,       -- unix millis
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_name ON items(name);

-- Multi-entry barcode index: one row per (item, barcode)
CREATE TABLE IF NOT EXISTS item_barcodes (
    item_id INTEGER NOT NULL,
    barcode TEXT NOT NULL,
    PRIMARY KEY (item_id, barcode),
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_item_barcodes_barcode ON item_barcodes(barcode);

-- Places: referenced by name from items, never cascades
CREATE TABLE IF NOT EXISTS places (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_places_name ON places(name);
"#;

const V2_PHOTOS: &str = r#"
-- Photos: binary payloads owned by at most one item
CREATE TABLE IF NOT EXISTS photos (
    id TEXT PRIMARY KEY,          -- photo_<millis>_<token>
    image BLOB NOT NULL,          -- downscaled JPEG
    thumbnail BLOB NOT NULL,      -- thumbnail JPEG
    item_id INTEGER,              -- NULL while the owning item is unsaved
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_item ON photos(item_id);
"#;

const V3_ITEM_LOOKUPS: &str = r#"
CREATE INDEX IF NOT EXISTS idx_items_type ON items(item_type);
CREATE INDEX IF NOT EXISTS idx_items_rating ON items(rating);
CREATE INDEX IF NOT EXISTS idx_items_place ON items(place);
"#;
