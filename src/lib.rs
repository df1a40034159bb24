//! Local persistence for a personal catalog: a SQLite record store with an
//! in-memory search index kept in step with it, image payload handling, a
//! photo lifecycle with garbage collection, and whole-catalog import/export.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod logging;
pub mod photos;
pub mod search;

pub use catalog::{Catalog, CatalogStats};
pub use config::{Config, PhotoConfig};
pub use error::{Error, Result};
