//! Cloud statistics per fixed-size raster block and per scene.
//!
//! A scene's cloud mask is cut into non-overlapping `tile_size` × `tile_size`
//! pixel blocks in row-major order; blocks at the right and bottom edge are
//! clipped to the image. Blocks without a single valid pixel are dropped.

use chrono::NaiveDate;
use ndarray::s;

use crate::catalog::SceneRef;
use crate::config::TilingConfig;
use crate::raster::{CloudMask, RasterError, RasterSource};

/// Axis-aligned envelope in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let mut bbox = Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for &(x, y) in points {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }
}

/// One row of the tile table.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub scene_id: String,
    pub date: NaiveDate,
    pub tile_row: i32,
    pub tile_col: i32,
    pub center_x: f64,
    pub center_y: f64,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub cloud_pct: f32,
    pub valid_pixel_pct: f32,
}

impl TileRecord {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x,
            min_y: self.min_y,
            max_x: self.max_x,
            max_y: self.max_y,
        }
    }
}

/// One row of the scene table.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneRecord {
    pub scene_id: String,
    pub date: NaiveDate,
    pub cog_url: String,
    pub total_tiles: i32,
    pub avg_cloud_pct: f32,
    pub min_cloud_pct: f32,
    pub max_cloud_pct: f32,
    /// `None` when the scene has no valid tile.
    pub bounds: Option<BoundingBox>,
    pub crs: Option<String>,
}

/// Tiling output for one scene.
#[derive(Debug, Clone)]
pub struct SceneTiles {
    pub summary: SceneRecord,
    pub tiles: Vec<TileRecord>,
}

/// Which pixel values count as cloud and which as no-data.
#[derive(Debug, Clone)]
pub struct PixelClasses {
    pub tile_size: usize,
    pub cloud_values: Vec<u16>,
    pub nodata: u16,
}

impl Default for PixelClasses {
    fn default() -> Self {
        Self::from(&TilingConfig::default())
    }
}

impl From<&TilingConfig> for PixelClasses {
    fn from(config: &TilingConfig) -> Self {
        Self {
            tile_size: config.tile_size.max(1),
            cloud_values: config.cloud_values.clone(),
            nodata: config.nodata,
        }
    }
}

/// Round half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

struct BlockCounts {
    cloud: usize,
    valid: usize,
    total: usize,
}

fn count_block(mask: &CloudMask, classes: &PixelClasses, row: usize, col: usize) -> BlockCounts {
    let row_end = (row + classes.tile_size).min(mask.height());
    let col_end = (col + classes.tile_size).min(mask.width());
    let block = mask.data.slice(s![row..row_end, col..col_end]);

    let mut counts = BlockCounts { cloud: 0, valid: 0, total: block.len() };
    for &value in block.iter() {
        if value != classes.nodata {
            counts.valid += 1;
        }
        if classes.cloud_values.contains(&value) {
            counts.cloud += 1;
        }
    }
    counts
}

/// Tile a decoded cloud mask and summarize it.
pub fn tile_scene(mask: &CloudMask, scene: &SceneRef, classes: &PixelClasses) -> SceneTiles {
    let size = classes.tile_size;
    let mut tiles = Vec::new();
    let mut cloud_pcts: Vec<f64> = Vec::new();

    for row in (0..mask.height()).step_by(size) {
        for col in (0..mask.width()).step_by(size) {
            let counts = count_block(mask, classes, row, col);
            if counts.valid == 0 {
                continue;
            }

            let cloud_pct = counts.cloud as f64 / counts.valid as f64 * 100.0;
            let valid_pct = counts.valid as f64 / counts.total as f64 * 100.0;
            cloud_pcts.push(cloud_pct);

            let row_end = (row + size).min(mask.height()) as f64;
            let col_end = (col + size).min(mask.width()) as f64;
            let (row0, col0) = (row as f64, col as f64);
            let bbox = BoundingBox::from_points(&[
                mask.transform.apply(col0, row0),
                mask.transform.apply(col_end, row0),
                mask.transform.apply(col0, row_end),
                mask.transform.apply(col_end, row_end),
            ]);
            let (center_x, center_y) = bbox.center();

            tiles.push(TileRecord {
                scene_id: scene.scene_id.clone(),
                date: scene.date,
                tile_row: (row / size) as i32,
                tile_col: (col / size) as i32,
                center_x,
                center_y,
                min_x: bbox.min_x,
                min_y: bbox.min_y,
                max_x: bbox.max_x,
                max_y: bbox.max_y,
                cloud_pct: round2(cloud_pct) as f32,
                valid_pixel_pct: round2(valid_pct) as f32,
            });
        }
    }

    let summary = summarize(scene, mask.crs.clone(), &tiles, &cloud_pcts);
    SceneTiles { summary, tiles }
}

fn summarize(
    scene: &SceneRef,
    crs: Option<String>,
    tiles: &[TileRecord],
    cloud_pcts: &[f64],
) -> SceneRecord {
    let mut summary = SceneRecord {
        scene_id: scene.scene_id.clone(),
        date: scene.date,
        cog_url: scene.cog_url.clone(),
        total_tiles: 0,
        avg_cloud_pct: 0.0,
        min_cloud_pct: 100.0,
        max_cloud_pct: 0.0,
        bounds: None,
        crs: Some(crs.unwrap_or_else(|| "unknown".to_string())),
    };

    if cloud_pcts.is_empty() {
        return summary;
    }

    let mean = cloud_pcts.iter().sum::<f64>() / cloud_pcts.len() as f64;
    let min = cloud_pcts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = cloud_pcts.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    summary.total_tiles = tiles.len() as i32;
    summary.avg_cloud_pct = round2(mean) as f32;
    summary.min_cloud_pct = round2(min) as f32;
    summary.max_cloud_pct = round2(max) as f32;
    summary.bounds = tiles
        .iter()
        .map(TileRecord::bbox)
        .reduce(|acc, bbox| acc.union(&bbox));
    summary
}

/// Open a scene's raster and tile it.
pub fn process_scene(
    source: &dyn RasterSource,
    scene: &SceneRef,
    classes: &PixelClasses,
) -> Result<SceneTiles, RasterError> {
    let mask = source.open(&scene.cog_url)?;
    tracing::debug!(
        "Scene {}: {}x{} pixels, crs {:?}",
        scene.scene_id,
        mask.width(),
        mask.height(),
        mask.crs
    );
    Ok(tile_scene(&mask, scene, classes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;
    use ndarray::Array2;

    fn scene() -> SceneRef {
        SceneRef {
            scene_id: "S2_20240601".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            cog_url: "https://example.org/S2_20240601_cloudmask.tif".to_string(),
        }
    }

    fn mask(data: Array2<u16>, transform: GeoTransform) -> CloudMask {
        CloudMask { data, transform, crs: Some("EPSG:2056".to_string()) }
    }

    #[test]
    fn test_all_cloud_200x200_identity() {
        let mask = mask(Array2::from_elem((200, 200), 1), GeoTransform::identity());
        let result = tile_scene(&mask, &scene(), &PixelClasses::default());

        assert_eq!(result.tiles.len(), 4);
        for tile in &result.tiles {
            assert_eq!(tile.cloud_pct, 100.0);
            assert_eq!(tile.valid_pixel_pct, 100.0);
        }
        let summary = &result.summary;
        assert_eq!(summary.total_tiles, 4);
        assert_eq!(summary.avg_cloud_pct, 100.0);
        assert_eq!(summary.min_cloud_pct, 100.0);
        assert_eq!(summary.max_cloud_pct, 100.0);
        assert_eq!(
            summary.bounds,
            Some(BoundingBox { min_x: 0.0, min_y: 0.0, max_x: 200.0, max_y: 200.0 })
        );
    }

    #[test]
    fn test_block_count_with_clipped_edges() {
        let mask = mask(Array2::from_elem((250, 310), 3), GeoTransform::identity());
        let result = tile_scene(&mask, &scene(), &PixelClasses::default());

        // ceil(250/100) * ceil(310/100)
        assert_eq!(result.tiles.len(), 3 * 4);
        let corner = result
            .tiles
            .iter()
            .find(|t| t.tile_row == 2 && t.tile_col == 3)
            .unwrap();
        assert_eq!(corner.max_x - corner.min_x, 10.0);
        assert_eq!(corner.max_y - corner.min_y, 50.0);
        assert_eq!(corner.valid_pixel_pct, 100.0);
        assert_eq!(corner.cloud_pct, 0.0);
    }

    #[test]
    fn test_nodata_blocks_are_dropped_and_ignored() {
        let mut data = Array2::from_elem((200, 200), 0u16);
        // top-left: half cloud, half clear
        data.slice_mut(s![0..100, 0..50]).fill(1);
        data.slice_mut(s![0..100, 50..100]).fill(4);
        // bottom-right: all clear
        data.slice_mut(s![100..200, 100..200]).fill(5);

        let mask = mask(data, GeoTransform::identity());
        let result = tile_scene(&mask, &scene(), &PixelClasses::default());

        assert_eq!(result.tiles.len(), 2);
        assert_eq!(result.summary.total_tiles, 2);
        assert_eq!(result.summary.min_cloud_pct, 0.0);
        assert_eq!(result.summary.max_cloud_pct, 50.0);
        assert_eq!(result.summary.avg_cloud_pct, 25.0);
    }

    #[test]
    fn test_cloud_pct_uses_valid_pixels_only() {
        let mut data = Array2::from_elem((100, 100), 0u16);
        // 3 cloud (values 1 and 2), 4 clear, rest no-data
        data[[0, 0]] = 1;
        data[[0, 1]] = 2;
        data[[0, 2]] = 2;
        for c in 3..7 {
            data[[1, c]] = 6;
        }

        let mask = mask(data, GeoTransform::identity());
        let result = tile_scene(&mask, &scene(), &PixelClasses::default());
        let tile = &result.tiles[0];

        assert_eq!(tile.cloud_pct, round2(3.0 / 7.0 * 100.0) as f32);
        assert_eq!(tile.cloud_pct, 42.86);
        assert_eq!(tile.valid_pixel_pct, 0.07);
    }

    #[test]
    fn test_empty_scene_keeps_sentinels() {
        let mask = mask(Array2::from_elem((120, 80), 0), GeoTransform::identity());
        let result = tile_scene(&mask, &scene(), &PixelClasses::default());

        assert!(result.tiles.is_empty());
        let summary = &result.summary;
        assert_eq!(summary.total_tiles, 0);
        assert_eq!(summary.avg_cloud_pct, 0.0);
        assert_eq!(summary.min_cloud_pct, 100.0);
        assert_eq!(summary.max_cloud_pct, 0.0);
        assert_eq!(summary.bounds, None);
    }

    #[test]
    fn test_scene_bounds_are_union_of_tiles() {
        let mut data = Array2::from_elem((300, 300), 0u16);
        data.slice_mut(s![0..100, 200..300]).fill(1);
        data.slice_mut(s![200..250, 0..100]).fill(3);

        let transform = GeoTransform::north_up(2_600_000.0, 1_200_000.0, 10.0, 10.0);
        let mask = mask(data, transform);
        let result = tile_scene(&mask, &scene(), &PixelClasses::default());

        let union = result
            .tiles
            .iter()
            .map(TileRecord::bbox)
            .reduce(|a, b| a.union(&b))
            .unwrap();
        assert_eq!(result.summary.bounds, Some(union));
        assert_eq!(
            union,
            BoundingBox {
                min_x: 2_600_000.0,
                min_y: 1_197_000.0,
                max_x: 2_603_000.0,
                max_y: 1_200_000.0,
            }
        );

        let top_right = result.tiles.iter().find(|t| t.tile_col == 2).unwrap();
        assert_eq!(top_right.tile_row, 0);
        assert_eq!((top_right.center_x, top_right.center_y), (2_602_500.0, 1_199_500.0));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(100.0), 100.0);
        assert_eq!(round2(0.0), 0.0);
    }

    struct FailingSource;

    impl RasterSource for FailingSource {
        fn open(&self, url: &str) -> Result<CloudMask, RasterError> {
            Err(RasterError::Fetch { url: url.to_string(), message: "connection refused".to_string() })
        }
    }

    #[test]
    fn test_process_scene_propagates_open_errors() {
        let err = process_scene(&FailingSource, &scene(), &PixelClasses::default()).unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
