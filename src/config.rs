use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stac: StacConfig,

    #[serde(default)]
    pub tiling: TilingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacConfig {
    /// Base URL of the STAC API (without the trailing `/search`).
    #[serde(default = "default_stac_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Item cap for the initial scrape.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Items requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// HTTP timeout for catalog requests and raster downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Substrings (lower-case) that identify the cloud-mask asset by key.
    #[serde(default = "default_asset_key_markers")]
    pub asset_key_markers: Vec<String>,

    /// Substrings (lower-case) that identify the cloud-mask asset by title.
    #[serde(default = "default_asset_title_markers")]
    pub asset_title_markers: Vec<String>,
}

fn default_stac_url() -> String {
    "https://sys-data.int.bgdi.ch/api/stac/v1".to_string()
}

fn default_collection() -> String {
    "ch.swisstopo.swisseo_s2-sr_v200".to_string()
}

fn default_max_items() -> usize {
    3000
}

fn default_page_size() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_asset_key_markers() -> Vec<String> {
    vec!["cloudmask".to_string()]
}

fn default_asset_title_markers() -> Vec<String> {
    vec!["cloud mask".to_string()]
}

impl Default for StacConfig {
    fn default() -> Self {
        Self {
            url: default_stac_url(),
            collection: default_collection(),
            max_items: default_max_items(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            asset_key_markers: default_asset_key_markers(),
            asset_title_markers: default_asset_title_markers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilingConfig {
    /// Tile edge in pixels. 100 px at 10 m resolution is 1 km.
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,

    /// Pixel values counted as cloud.
    #[serde(default = "default_cloud_values")]
    pub cloud_values: Vec<u16>,

    /// No-data sentinel.
    #[serde(default)]
    pub nodata: u16,

    /// Largest raster accepted, in MiB, both downloaded and decoded.
    #[serde(default = "default_max_raster_mb")]
    pub max_raster_mb: usize,
}

fn default_tile_size() -> usize {
    100
}

fn default_cloud_values() -> Vec<u16> {
    vec![1, 2]
}

fn default_max_raster_mb() -> usize {
    1024
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            cloud_values: default_cloud_values(),
            nodata: 0,
            max_raster_mb: default_max_raster_mb(),
        }
    }
}

impl TilingConfig {
    pub fn max_raster_bytes(&self) -> usize {
        self.max_raster_mb.max(1).saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `scenes.parquet`, `tiles/` and `scenes.csv`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Successful scenes accumulated before each insert during the initial build.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_scenes_row_group")]
    pub scenes_row_group: usize,

    #[serde(default = "default_tiles_row_group")]
    pub tiles_row_group: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_batch_size() -> usize {
    50
}

fn default_scenes_row_group() -> usize {
    10_000
}

fn default_tiles_row_group() -> usize {
    5_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            batch_size: default_batch_size(),
            scenes_row_group: default_scenes_row_group(),
            tiles_row_group: default_tiles_row_group(),
        }
    }
}

impl StorageConfig {
    pub fn scenes_path(&self) -> PathBuf {
        self.data_dir.join("scenes.parquet")
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.data_dir.join("tiles")
    }

    pub fn csv_path(&self) -> PathBuf {
        self.data_dir.join("scenes.csv")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hours between two daemon runs.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Search window of the incremental update, in days before now.
    #[serde(default = "default_days_back")]
    pub days_back: i64,

    /// Start hour for hours of operation (0-23).
    #[serde(default)]
    pub hours_start: Option<u8>,

    /// End hour for hours of operation (0-23).
    #[serde(default)]
    pub hours_end: Option<u8>,
}

fn default_interval_hours() -> u64 {
    24
}

fn default_days_back() -> i64 {
    2
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            days_back: default_days_back(),
            hours_start: None,
            hours_end: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stac: StacConfig::default(),
            tiling: TilingConfig::default(),
            storage: StorageConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing a default file if none exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::read(&config_path)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit path; a missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env();
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// `STAC_URL` and `COLLECTION_ID` win over the file.
    fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("STAC_URL").ok(),
            std::env::var("COLLECTION_ID").ok(),
        );
    }

    fn apply_overrides(&mut self, url: Option<String>, collection: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.stac.url = url;
        }
        if let Some(collection) = collection.filter(|c| !c.trim().is_empty()) {
            self.stac.collection = collection;
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cloudmask")
    }

    /// `CLOUDMASK_CONFIG` overrides the default location.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CLOUDMASK_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[stac]
collection = "my-collection"

[storage]
data_dir = "/srv/cloudmask"
"#,
        )
        .unwrap();

        let config = Config::read(&path).unwrap();
        assert_eq!(config.stac.collection, "my-collection");
        assert_eq!(config.stac.url, default_stac_url());
        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/cloudmask"));
        assert_eq!(config.storage.batch_size, 50);
        assert_eq!(config.tiling.tile_size, 100);
        assert_eq!(config.tiling.cloud_values, vec![1, 2]);
        assert_eq!(config.tiling.max_raster_bytes(), 1024 * 1024 * 1024);
        assert_eq!(config.schedule.days_back, 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.schedule.hours_start = Some(22);
        config.schedule.hours_end = Some(6);
        config.save_to(&path).unwrap();

        let loaded = Config::read(&path).unwrap();
        assert_eq!(loaded.schedule.hours_start, Some(22));
        assert_eq!(loaded.schedule.hours_end, Some(6));
        assert_eq!(loaded.stac.max_items, 3000);
    }

    #[test]
    fn test_overrides_ignore_blank_values() {
        let mut config = Config::default();
        config.apply_overrides(Some("http://localhost:8080".to_string()), Some("  ".to_string()));
        assert_eq!(config.stac.url, "http://localhost:8080");
        assert_eq!(config.stac.collection, default_collection());
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("out"),
            ..Default::default()
        };
        assert_eq!(storage.scenes_path(), PathBuf::from("out/scenes.parquet"));
        assert_eq!(storage.tiles_dir(), PathBuf::from("out/tiles"));
        assert_eq!(storage.csv_path(), PathBuf::from("out/scenes.csv"));
    }
}
