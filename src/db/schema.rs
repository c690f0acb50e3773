pub const SCHEMA: &str = r#"
-- One row per catalog item with a cloud-mask asset
CREATE TABLE IF NOT EXISTS scenes (
    scene_id TEXT PRIMARY KEY,
    date TEXT NOT NULL,              -- YYYY-MM-DD
    cog_url TEXT NOT NULL,
    total_tiles INTEGER NOT NULL,
    avg_cloud_pct REAL NOT NULL,
    min_cloud_pct REAL NOT NULL,
    max_cloud_pct REAL NOT NULL,

    -- Union of tile envelopes, NULL when the scene has no valid tile
    bounds_min_x REAL,
    bounds_min_y REAL,
    bounds_max_x REAL,
    bounds_max_y REAL,

    crs TEXT
);

CREATE INDEX IF NOT EXISTS idx_scenes_date ON scenes(date);

-- 1 km cells of each scene's cloud mask
CREATE TABLE IF NOT EXISTS cloud_tiles (
    scene_id TEXT NOT NULL,
    date TEXT NOT NULL,
    tile_row INTEGER NOT NULL,
    tile_col INTEGER NOT NULL,
    center_x REAL NOT NULL,
    center_y REAL NOT NULL,
    min_x REAL NOT NULL,
    min_y REAL NOT NULL,
    max_x REAL NOT NULL,
    max_y REAL NOT NULL,
    cloud_pct REAL NOT NULL,
    valid_pixel_pct REAL NOT NULL,
    PRIMARY KEY (scene_id, tile_row, tile_col),
    FOREIGN KEY (scene_id) REFERENCES scenes(scene_id)
);
"#;
