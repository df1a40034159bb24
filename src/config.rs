use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::{DownscaleOptions, ThumbnailOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub photos: PhotoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoConfig {
    #[serde(default = "default_thumbnail_max_side")]
    pub thumbnail_max_width: u32,

    #[serde(default = "default_thumbnail_max_side")]
    pub thumbnail_max_height: u32,

    #[serde(default = "default_quality")]
    pub thumbnail_quality: f32,

    /// Factor applied to both sides of captured images before storing.
    #[serde(default = "default_downscale_factor")]
    pub downscale_factor: f32,

    #[serde(default = "default_quality")]
    pub downscale_quality: f32,

    /// How long an ownerless photo survives before garbage collection
    /// treats it as an abandoned edit.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

fn default_thumbnail_max_side() -> u32 {
    150
}

fn default_quality() -> f32 {
    0.7
}

fn default_downscale_factor() -> f32 {
    0.7
}

fn default_orphan_grace_secs() -> u64 {
    60 * 60
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            thumbnail_max_width: default_thumbnail_max_side(),
            thumbnail_max_height: default_thumbnail_max_side(),
            thumbnail_quality: default_quality(),
            downscale_factor: default_downscale_factor(),
            downscale_quality: default_quality(),
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

impl PhotoConfig {
    pub fn thumbnail(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            max_width: self.thumbnail_max_width,
            max_height: self.thumbnail_max_height,
            quality: self.thumbnail_quality,
        }
    }

    pub fn downscale(&self) -> DownscaleOptions {
        DownscaleOptions {
            scale: self.downscale_factor,
            quality: self.downscale_quality,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelfmark")
        .join("shelfmark.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            photos: PhotoConfig::default(),
        }
    }
}

impl Config {
    /// Load from `SHELFMARK_CONFIG` or the default location, writing the
    /// default config there if nothing exists yet.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shelfmark")
    }

    fn config_path() -> PathBuf {
        match std::env::var_os("SHELFMARK_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => Self::config_dir().join("config.toml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_path = \"/tmp/x.db\"\n[photos]\norphan_grace_secs = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.photos.orphan_grace_secs, 5);
        assert_eq!(config.photos.thumbnail(), ThumbnailOptions::default());
        assert_eq!(config.photos.downscale(), DownscaleOptions::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.photos.thumbnail_max_width = 200;
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.photos.thumbnail_max_width, 200);
        assert_eq!(reloaded.db_path, config.db_path);
    }
}
