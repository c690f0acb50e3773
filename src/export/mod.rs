use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::columnar;
use crate::tiling::SceneRecord;

/// Columns of the CSV summary, in output order.
pub const CSV_COLUMNS: [&str; 9] = [
    "scene_id",
    "date",
    "cog_url",
    "avg_cloud_pct",
    "total_tiles",
    "bounds_min_x",
    "bounds_min_y",
    "bounds_max_x",
    "bounds_max_y",
];

#[derive(Debug, Clone, PartialEq)]
pub struct CsvExportSummary {
    pub rows: usize,
    pub bytes: u64,
    pub path: PathBuf,
}

fn csv_row(scene: &SceneRecord) -> [String; 9] {
    let bound = |f: fn(&crate::tiling::BoundingBox) -> f64| {
        scene.bounds.as_ref().map(|b| f(b).to_string()).unwrap_or_default()
    };

    [
        scene.scene_id.clone(),
        scene.date.format("%Y-%m-%d").to_string(),
        scene.cog_url.clone(),
        scene.avg_cloud_pct.to_string(),
        scene.total_tiles.to_string(),
        bound(|b| b.min_x),
        bound(|b| b.min_y),
        bound(|b| b.max_x),
        bound(|b| b.max_y),
    ]
}

/// Write the scene summary as CSV, newest scenes first.
pub fn export_scenes_csv(parquet_path: &Path, csv_path: &Path) -> Result<CsvExportSummary> {
    if !parquet_path.exists() {
        bail!(
            "{} not found. Run `cloudmask init` first.",
            parquet_path.display()
        );
    }

    let mut scenes = columnar::read_scenes(parquet_path)?;
    scenes.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.scene_id.cmp(&b.scene_id)));

    if let Some(parent) = csv_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    wtr.write_record(CSV_COLUMNS)?;
    for scene in &scenes {
        wtr.write_record(csv_row(scene))?;
    }
    wtr.flush()?;

    let bytes = fs::metadata(csv_path)?.len();
    Ok(CsvExportSummary {
        rows: scenes.len(),
        bytes,
        path: csv_path.to_path_buf(),
    })
}
