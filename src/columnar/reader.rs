use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, Date32Array, Float32Array, Float64Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{days_to_date, scene_id_from_dir_name};
use crate::tiling::{BoundingBox, SceneRecord, TileRecord};

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("Not a Parquet file: {}", path.display()))?
        .build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("missing column {}", name))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("column {} has unexpected type", name))
}

fn date_value(array: &Date32Array, i: usize) -> Result<chrono::NaiveDate> {
    days_to_date(array.value(i)).ok_or_else(|| anyhow!("date out of range: {}", array.value(i)))
}

fn optional_f64(array: &Float64Array, i: usize) -> Option<f64> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i))
    }
}

/// Read `scenes.parquet` in file order.
pub fn read_scenes(path: &Path) -> Result<Vec<SceneRecord>> {
    let mut scenes = Vec::new();

    for batch in read_batches(path)? {
        let scene_id = column::<StringArray>(&batch, "scene_id")?;
        let date = column::<Date32Array>(&batch, "date")?;
        let cog_url = column::<StringArray>(&batch, "cog_url")?;
        let total_tiles = column::<Int32Array>(&batch, "total_tiles")?;
        let avg = column::<Float32Array>(&batch, "avg_cloud_pct")?;
        let min = column::<Float32Array>(&batch, "min_cloud_pct")?;
        let max = column::<Float32Array>(&batch, "max_cloud_pct")?;
        let min_x = column::<Float64Array>(&batch, "bounds_min_x")?;
        let min_y = column::<Float64Array>(&batch, "bounds_min_y")?;
        let max_x = column::<Float64Array>(&batch, "bounds_max_x")?;
        let max_y = column::<Float64Array>(&batch, "bounds_max_y")?;
        let crs = column::<StringArray>(&batch, "crs")?;

        for i in 0..batch.num_rows() {
            let bounds = match (
                optional_f64(min_x, i),
                optional_f64(min_y, i),
                optional_f64(max_x, i),
                optional_f64(max_y, i),
            ) {
                (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => {
                    Some(BoundingBox { min_x, min_y, max_x, max_y })
                }
                _ => None,
            };

            scenes.push(SceneRecord {
                scene_id: scene_id.value(i).to_string(),
                date: date_value(date, i)?,
                cog_url: cog_url.value(i).to_string(),
                total_tiles: total_tiles.value(i),
                avg_cloud_pct: avg.value(i),
                min_cloud_pct: min.value(i),
                max_cloud_pct: max.value(i),
                bounds,
                crs: (!crs.is_null(i)).then(|| crs.value(i).to_string()),
            });
        }
    }

    Ok(scenes)
}

fn read_partition(path: &Path, scene_id: &str, tiles: &mut Vec<TileRecord>) -> Result<()> {
    for batch in read_batches(path)? {
        let date = column::<Date32Array>(&batch, "date")?;
        let tile_row = column::<Int32Array>(&batch, "tile_row")?;
        let tile_col = column::<Int32Array>(&batch, "tile_col")?;
        let center_x = column::<Float64Array>(&batch, "center_x")?;
        let center_y = column::<Float64Array>(&batch, "center_y")?;
        let min_x = column::<Float64Array>(&batch, "min_x")?;
        let min_y = column::<Float64Array>(&batch, "min_y")?;
        let max_x = column::<Float64Array>(&batch, "max_x")?;
        let max_y = column::<Float64Array>(&batch, "max_y")?;
        let cloud_pct = column::<Float32Array>(&batch, "cloud_pct")?;
        let valid_pct = column::<Float32Array>(&batch, "valid_pixel_pct")?;

        for i in 0..batch.num_rows() {
            tiles.push(TileRecord {
                scene_id: scene_id.to_string(),
                date: date_value(date, i)?,
                tile_row: tile_row.value(i),
                tile_col: tile_col.value(i),
                center_x: center_x.value(i),
                center_y: center_y.value(i),
                min_x: min_x.value(i),
                min_y: min_y.value(i),
                max_x: max_x.value(i),
                max_y: max_y.value(i),
                cloud_pct: cloud_pct.value(i),
                valid_pixel_pct: valid_pct.value(i),
            });
        }
    }
    Ok(())
}

/// Partition files as (scene_id, path), sorted by path.
fn partition_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut files: Vec<(String, PathBuf)> = WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "parquet"))
        .filter_map(|e| {
            let parent = e.path().parent()?.file_name()?.to_str()?;
            let scene_id = scene_id_from_dir_name(parent)?;
            Some((scene_id, e.path().to_path_buf()))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

/// Read every `scene_id=<id>/*.parquet` file below `dir`. A missing
/// directory reads as an empty table.
pub fn read_tiles(dir: &Path) -> Result<Vec<TileRecord>> {
    let mut tiles = Vec::new();
    if !dir.exists() {
        return Ok(tiles);
    }

    for (scene_id, path) in partition_files(dir) {
        read_partition(&path, &scene_id, &mut tiles)?;
    }
    Ok(tiles)
}
