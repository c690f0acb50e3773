//! Initial build and incremental update of the scene and tile tables.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::catalog::{SceneCatalog, SceneRef, SearchQuery};
use crate::columnar::{self, ParquetOptions};
use crate::config::{Config, StorageConfig};
use crate::db::{Database, DatabaseStats};
use crate::raster::RasterSource;
use crate::tiling::{self, PixelClasses, SceneRecord, TileRecord};

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    /// Scenes handed to the tiler.
    pub processed: usize,
    pub added_scenes: usize,
    pub added_tiles: usize,
    /// Ids of scenes whose raster could not be processed.
    pub failed: Vec<String>,
    /// Incoming scenes that were already known (or repeated).
    pub skipped_existing: usize,
    /// Whether the Parquet files were rewritten.
    pub written: bool,
    pub stats: Option<DatabaseStats>,
}

#[derive(Default)]
struct Batch {
    scenes: Vec<SceneRecord>,
    tiles: Vec<TileRecord>,
}

impl Batch {
    fn flush(&mut self, db: &mut Database, report: &mut UpdateReport) -> Result<()> {
        if self.scenes.is_empty() {
            return Ok(());
        }
        db.insert_batch(&self.scenes, &self.tiles)?;
        info!("Inserted {} scenes, {} tiles", self.scenes.len(), self.tiles.len());
        report.added_scenes += self.scenes.len();
        report.added_tiles += self.tiles.len();
        self.scenes.clear();
        self.tiles.clear();
        Ok(())
    }
}

/// Drop scenes whose id is already known; the first of repeated ids wins.
fn new_scenes<'a>(scenes: &'a [SceneRef], existing: &HashSet<String>) -> Vec<&'a SceneRef> {
    let mut seen = HashSet::new();
    scenes
        .iter()
        .filter(|s| !existing.contains(&s.scene_id))
        .filter(|s| seen.insert(s.scene_id.clone()))
        .collect()
}

pub struct Updater<'a> {
    storage: StorageConfig,
    classes: PixelClasses,
    source: &'a dyn RasterSource,
}

impl<'a> Updater<'a> {
    pub fn new(storage: StorageConfig, classes: PixelClasses, source: &'a dyn RasterSource) -> Self {
        Self { storage, classes, source }
    }

    pub fn from_config(config: &Config, source: &'a dyn RasterSource) -> Self {
        Self::new(config.storage.clone(), PixelClasses::from(&config.tiling), source)
    }

    /// Tile `scene` and add it to `batch`; failures are logged and recorded.
    fn process(&self, idx: usize, total: usize, scene: &SceneRef, batch: &mut Batch, report: &mut UpdateReport) {
        info!("Processing {}/{}: {}", idx, total, scene.scene_id);
        report.processed += 1;

        match tiling::process_scene(self.source, scene, &self.classes) {
            Ok(result) => {
                batch.scenes.push(result.summary);
                batch.tiles.extend(result.tiles);
            }
            Err(e) => {
                error!("Error processing {}: {}", scene.scene_id, e);
                report.failed.push(scene.scene_id.clone());
            }
        }
    }

    /// Build the tables from scratch, inserting every `batch_size` scenes.
    pub fn build_initial(&self, scenes: &[SceneRef]) -> Result<UpdateReport> {
        if self.storage.scenes_path().exists() {
            warn!(
                "{} already exists and will be replaced",
                self.storage.scenes_path().display()
            );
        }

        let mut db = Database::open_in_memory()?;
        db.initialize()?;

        let mut report = UpdateReport::default();
        let scenes = new_scenes(scenes, &HashSet::new());
        let total = scenes.len();
        let batch_size = self.storage.batch_size.max(1);
        let mut batch = Batch::default();

        for (idx, scene) in scenes.into_iter().enumerate() {
            self.process(idx + 1, total, scene, &mut batch, &mut report);
            if batch.scenes.len() >= batch_size {
                batch.flush(&mut db, &mut report)?;
            }
        }
        batch.flush(&mut db, &mut report)?;

        report.stats = Some(self.export(&db)?);
        report.written = true;
        Ok(report)
    }

    /// Merge scenes not yet in the tables and re-export everything.
    pub fn update(&self, scenes: &[SceneRef]) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        if scenes.is_empty() {
            info!("No new scenes to add");
            return Ok(report);
        }

        let mut db = Database::open_in_memory()?;
        db.initialize()?;
        self.load_existing(&mut db)?;

        let existing = db.scene_ids()?;
        let fresh = new_scenes(scenes, &existing);
        report.skipped_existing = scenes.len() - fresh.len();

        if fresh.is_empty() {
            info!("All scenes already in database");
            return Ok(report);
        }

        info!("Adding {} new scenes...", fresh.len());
        let total = fresh.len();
        let mut batch = Batch::default();
        for (idx, scene) in fresh.into_iter().enumerate() {
            self.process(idx + 1, total, scene, &mut batch, &mut report);
        }
        batch.flush(&mut db, &mut report)?;

        if report.added_scenes == 0 {
            warn!("No scene could be processed, leaving files untouched");
            return Ok(report);
        }

        report.stats = Some(self.export(&db)?);
        report.written = true;
        Ok(report)
    }

    /// Load the current Parquet files, if any, into `db`.
    fn load_existing(&self, db: &mut Database) -> Result<()> {
        let scenes_path = self.storage.scenes_path();
        if !scenes_path.exists() {
            info!("No existing tables at {}, starting fresh", scenes_path.display());
            return Ok(());
        }

        let scenes = columnar::read_scenes(&scenes_path)?;
        let known: HashSet<&str> = scenes.iter().map(|s| s.scene_id.as_str()).collect();

        let (tiles, orphans): (Vec<TileRecord>, Vec<TileRecord>) =
            columnar::read_tiles(&self.storage.tiles_dir())?
                .into_iter()
                .partition(|t| known.contains(t.scene_id.as_str()));
        if !orphans.is_empty() {
            warn!("Ignoring {} tiles without a scene record", orphans.len());
        }

        db.insert_batch(&scenes, &tiles)?;
        info!("Loaded {} existing scenes, {} tiles", scenes.len(), tiles.len());
        Ok(())
    }

    /// Re-export both tables in canonical order.
    ///
    /// Tiles go first: a scene only becomes known once `scenes.parquet` is
    /// replaced, so a failed tile write leaves it to be retried.
    fn export(&self, db: &Database) -> Result<DatabaseStats> {
        info!("Exporting to Parquet...");
        let options = ParquetOptions::from(&self.storage);

        let tiles = db.tiles_ordered()?;
        columnar::write_tiles(&self.storage.tiles_dir(), &tiles, &options)?;

        let scenes = db.scenes_by_date_desc()?;
        columnar::write_scenes(&self.storage.scenes_path(), &scenes, &options)?;

        db.stats()
    }
}

pub fn log_stats(stats: &DatabaseStats) {
    let range = match (stats.earliest, stats.latest) {
        (Some(earliest), Some(latest)) => format!("{} to {}", earliest, latest),
        _ => "-".to_string(),
    };
    info!(
        scenes = stats.total_scenes,
        tiles = stats.total_tiles,
        "Database: {} scenes, date range {}, avg cloud {:.1}%, {} tiles",
        stats.total_scenes,
        range,
        stats.avg_cloud.unwrap_or(0.0),
        stats.total_tiles
    );
}

/// Scrape the whole collection (up to `stac.max_items`) and build the tables.
pub fn initial_scrape(
    config: &Config,
    catalog: &dyn SceneCatalog,
    source: &dyn RasterSource,
) -> Result<UpdateReport> {
    let query = SearchQuery::capped(&config.stac.collection, config.stac.max_items);
    let scenes = catalog.fetch_scenes(&query)?;
    if scenes.is_empty() {
        bail!("No scenes found in collection {}", config.stac.collection);
    }

    let report = Updater::from_config(config, source).build_initial(&scenes)?;
    if let Some(ref stats) = report.stats {
        log_stats(stats);
    }
    Ok(report)
}

/// Fetch the last `schedule.days_back` days and merge new scenes.
pub fn daily_update(
    config: &Config,
    catalog: &dyn SceneCatalog,
    source: &dyn RasterSource,
    now: DateTime<Utc>,
) -> Result<UpdateReport> {
    let query = SearchQuery::last_days(&config.stac.collection, config.schedule.days_back, now);
    let scenes = catalog.fetch_scenes(&query)?;
    info!("Found {} candidate scenes", scenes.len());

    let report = Updater::from_config(config, source).update(&scenes)?;
    if let Some(ref stats) = report.stats {
        log_stats(stats);
    }
    Ok(report)
}
