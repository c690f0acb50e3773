//! Arrow schemas of the persisted tables.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

/// `scenes.parquet`
pub fn scenes_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("scene_id", DataType::Utf8, false),
        Field::new("date", DataType::Date32, false),
        Field::new("cog_url", DataType::Utf8, false),
        Field::new("total_tiles", DataType::Int32, false),
        Field::new("avg_cloud_pct", DataType::Float32, false),
        Field::new("min_cloud_pct", DataType::Float32, false),
        Field::new("max_cloud_pct", DataType::Float32, false),
        Field::new("bounds_min_x", DataType::Float64, true),
        Field::new("bounds_min_y", DataType::Float64, true),
        Field::new("bounds_max_x", DataType::Float64, true),
        Field::new("bounds_max_y", DataType::Float64, true),
        Field::new("crs", DataType::Utf8, true),
    ]))
}

/// Files under `tiles/scene_id=<id>/`. The partition column lives in the
/// directory name, not in the file.
pub fn tile_partition_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("tile_row", DataType::Int32, false),
        Field::new("tile_col", DataType::Int32, false),
        Field::new("center_x", DataType::Float64, false),
        Field::new("center_y", DataType::Float64, false),
        Field::new("min_x", DataType::Float64, false),
        Field::new("min_y", DataType::Float64, false),
        Field::new("max_x", DataType::Float64, false),
        Field::new("max_y", DataType::Float64, false),
        Field::new("cloud_pct", DataType::Float32, false),
        Field::new("valid_pixel_pct", DataType::Float32, false),
    ]))
}
