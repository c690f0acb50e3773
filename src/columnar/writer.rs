use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Date32Array, Float32Array, Float64Array, Int32Array, StringArray};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::schema::{scenes_schema, tile_partition_schema};
use super::{date_to_days, partition_dir_name, PARTITION_FILE};
use crate::config::StorageConfig;
use crate::tiling::{SceneRecord, TileRecord};

/// Row-group sizing for the two tables. Both are ZSTD compressed.
#[derive(Debug, Clone, Copy)]
pub struct ParquetOptions {
    pub scenes_row_group: usize,
    pub tiles_row_group: usize,
}

impl Default for ParquetOptions {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for ParquetOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            scenes_row_group: config.scenes_row_group.max(1),
            tiles_row_group: config.tiles_row_group.max(1),
        }
    }
}

fn writer_properties(row_group: usize) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_max_row_group_size(row_group)
        .build()
}

fn write_batch(path: &Path, schema: SchemaRef, batch: &RecordBatch, row_group: usize) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties(row_group)))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn scenes_batch(scenes: &[SceneRecord]) -> Result<RecordBatch> {
    let bounds = |f: fn(&crate::tiling::BoundingBox) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from(
            scenes.iter().map(|s| s.bounds.as_ref().map(f)).collect::<Vec<_>>(),
        ))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(scenes.iter().map(|s| s.scene_id.as_str()))),
        Arc::new(Date32Array::from(scenes.iter().map(|s| date_to_days(s.date)).collect::<Vec<_>>())),
        Arc::new(StringArray::from_iter_values(scenes.iter().map(|s| s.cog_url.as_str()))),
        Arc::new(Int32Array::from(scenes.iter().map(|s| s.total_tiles).collect::<Vec<_>>())),
        Arc::new(Float32Array::from(scenes.iter().map(|s| s.avg_cloud_pct).collect::<Vec<_>>())),
        Arc::new(Float32Array::from(scenes.iter().map(|s| s.min_cloud_pct).collect::<Vec<_>>())),
        Arc::new(Float32Array::from(scenes.iter().map(|s| s.max_cloud_pct).collect::<Vec<_>>())),
        bounds(|b| b.min_x),
        bounds(|b| b.min_y),
        bounds(|b| b.max_x),
        bounds(|b| b.max_y),
        Arc::new(StringArray::from(scenes.iter().map(|s| s.crs.as_deref()).collect::<Vec<_>>())),
    ];

    Ok(RecordBatch::try_new(scenes_schema(), columns)?)
}

fn tiles_batch(tiles: &[TileRecord]) -> Result<RecordBatch> {
    let f64_column = |f: fn(&TileRecord) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from(tiles.iter().map(f).collect::<Vec<_>>()))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Date32Array::from(tiles.iter().map(|t| date_to_days(t.date)).collect::<Vec<_>>())),
        Arc::new(Int32Array::from(tiles.iter().map(|t| t.tile_row).collect::<Vec<_>>())),
        Arc::new(Int32Array::from(tiles.iter().map(|t| t.tile_col).collect::<Vec<_>>())),
        f64_column(|t| t.center_x),
        f64_column(|t| t.center_y),
        f64_column(|t| t.min_x),
        f64_column(|t| t.min_y),
        f64_column(|t| t.max_x),
        f64_column(|t| t.max_y),
        Arc::new(Float32Array::from(tiles.iter().map(|t| t.cloud_pct).collect::<Vec<_>>())),
        Arc::new(Float32Array::from(tiles.iter().map(|t| t.valid_pixel_pct).collect::<Vec<_>>())),
    ];

    Ok(RecordBatch::try_new(tile_partition_schema(), columns)?)
}

/// Sibling path used for write-then-rename.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write the scene table in the given order, replacing `path` atomically.
pub fn write_scenes(path: &Path, scenes: &[SceneRecord], options: &ParquetOptions) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let batch = scenes_batch(scenes)?;
    let staging = staging_path(path);
    write_batch(&staging, scenes_schema(), &batch, options.scenes_row_group)?;
    fs::rename(&staging, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;

    debug!("Wrote {} scenes to {}", scenes.len(), path.display());
    Ok(())
}

/// Write one partition per scene under `dir`, replacing the whole directory.
///
/// `tiles` must already be sorted by (scene_id, tile_row, tile_col); the
/// order inside each partition follows the input.
pub fn write_tiles(dir: &Path, tiles: &[TileRecord], options: &ParquetOptions) -> Result<usize> {
    let staging = staging_path(dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let mut partitions = 0;
    for group in tiles.chunk_by(|a, b| a.scene_id == b.scene_id) {
        let partition = staging.join(partition_dir_name(&group[0].scene_id));
        fs::create_dir_all(&partition)?;

        let batch = tiles_batch(group)?;
        write_batch(
            &partition.join(PARTITION_FILE),
            tile_partition_schema(),
            &batch,
            options.tiles_row_group,
        )?;
        partitions += 1;
    }

    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove old {}", dir.display()))?;
    }
    fs::rename(&staging, dir)
        .with_context(|| format!("Failed to move {} into place", dir.display()))?;

    debug!("Wrote {} tiles in {} partitions to {}", tiles.len(), partitions, dir.display());
    Ok(partitions)
}
