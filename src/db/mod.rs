//! Working database for a run.
//!
//! The Parquet files are the system of record. Each run loads them into an
//! in-memory SQLite database, merges new scenes there, and re-exports the
//! full tables in their canonical order.

mod schema;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;

pub use schema::SCHEMA;

use crate::tiling::{BoundingBox, SceneRecord, TileRecord};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Aggregate counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseStats {
    pub total_scenes: i64,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
    pub avg_cloud: Option<f64>,
    pub total_tiles: i64,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn scene_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT scene_id FROM scenes")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Insert scenes and their tiles in one transaction.
    pub fn insert_batch(&mut self, scenes: &[SceneRecord], tiles: &[TileRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut scene_stmt = tx.prepare(
                r#"
                INSERT INTO scenes (
                    scene_id, date, cog_url, total_tiles,
                    avg_cloud_pct, min_cloud_pct, max_cloud_pct,
                    bounds_min_x, bounds_min_y, bounds_max_x, bounds_max_y, crs
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for scene in scenes {
                let bounds = scene.bounds;
                scene_stmt.execute(params![
                    scene.scene_id,
                    scene.date.format(DATE_FORMAT).to_string(),
                    scene.cog_url,
                    scene.total_tiles,
                    scene.avg_cloud_pct as f64,
                    scene.min_cloud_pct as f64,
                    scene.max_cloud_pct as f64,
                    bounds.map(|b| b.min_x),
                    bounds.map(|b| b.min_y),
                    bounds.map(|b| b.max_x),
                    bounds.map(|b| b.max_y),
                    scene.crs,
                ])?;
            }

            let mut tile_stmt = tx.prepare(
                r#"
                INSERT INTO cloud_tiles (
                    scene_id, date, tile_row, tile_col, center_x, center_y,
                    min_x, min_y, max_x, max_y, cloud_pct, valid_pixel_pct
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for tile in tiles {
                tile_stmt.execute(params![
                    tile.scene_id,
                    tile.date.format(DATE_FORMAT).to_string(),
                    tile.tile_row,
                    tile.tile_col,
                    tile.center_x,
                    tile.center_y,
                    tile.min_x,
                    tile.min_y,
                    tile.max_x,
                    tile.max_y,
                    tile.cloud_pct as f64,
                    tile.valid_pixel_pct as f64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All scenes, newest first.
    pub fn scenes_by_date_desc(&self) -> Result<Vec<SceneRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT scene_id, date, cog_url, total_tiles,
                   avg_cloud_pct, min_cloud_pct, max_cloud_pct,
                   bounds_min_x, bounds_min_y, bounds_max_x, bounds_max_y, crs
            FROM scenes
            ORDER BY date DESC, scene_id
            "#,
        )?;
        let scenes = stmt
            .query_map([], scene_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scenes)
    }

    /// All tiles ordered by scene, row, column.
    pub fn tiles_ordered(&self) -> Result<Vec<TileRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT scene_id, date, tile_row, tile_col, center_x, center_y,
                   min_x, min_y, max_x, max_y, cloud_pct, valid_pixel_pct
            FROM cloud_tiles
            ORDER BY scene_id, tile_row, tile_col
            "#,
        )?;
        let tiles = stmt
            .query_map([], tile_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tiles)
    }

    pub fn tile_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cloud_tiles", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let stats = self.conn.query_row(
            r#"
            SELECT COUNT(*), MIN(date), MAX(date), AVG(avg_cloud_pct), COALESCE(SUM(total_tiles), 0)
            FROM scenes
            "#,
            [],
            |row| {
                Ok(DatabaseStats {
                    total_scenes: row.get(0)?,
                    earliest: optional_date(row, 1)?,
                    latest: optional_date(row, 2)?,
                    avg_cloud: row.get(3)?,
                    total_tiles: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }
}

fn parse_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn date_at(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let value: String = row.get(idx)?;
    parse_date(idx, &value)
}

fn optional_date(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let value: Option<String> = row.get(idx)?;
    value.map(|v| parse_date(idx, &v)).transpose()
}

fn scene_from_row(row: &Row) -> rusqlite::Result<SceneRecord> {
    let bounds: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
        (row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?);
    let bounds = match bounds {
        (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => {
            Some(BoundingBox { min_x, min_y, max_x, max_y })
        }
        _ => None,
    };

    Ok(SceneRecord {
        scene_id: row.get(0)?,
        date: date_at(row, 1)?,
        cog_url: row.get(2)?,
        total_tiles: row.get(3)?,
        avg_cloud_pct: row.get::<_, f64>(4)? as f32,
        min_cloud_pct: row.get::<_, f64>(5)? as f32,
        max_cloud_pct: row.get::<_, f64>(6)? as f32,
        bounds,
        crs: row.get(11)?,
    })
}

fn tile_from_row(row: &Row) -> rusqlite::Result<TileRecord> {
    Ok(TileRecord {
        scene_id: row.get(0)?,
        date: date_at(row, 1)?,
        tile_row: row.get(2)?,
        tile_col: row.get(3)?,
        center_x: row.get(4)?,
        center_y: row.get(5)?,
        min_x: row.get(6)?,
        min_y: row.get(7)?,
        max_x: row.get(8)?,
        max_y: row.get(9)?,
        cloud_pct: row.get::<_, f64>(10)? as f32,
        valid_pixel_pct: row.get::<_, f64>(11)? as f32,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn scene(id: &str, date: &str, avg: f32) -> SceneRecord {
        SceneRecord {
            scene_id: id.to_string(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            cog_url: format!("https://example.org/{}_cloudmask.tif", id),
            total_tiles: 1,
            avg_cloud_pct: avg,
            min_cloud_pct: avg,
            max_cloud_pct: avg,
            bounds: Some(BoundingBox { min_x: 0.0, min_y: 0.0, max_x: 1000.0, max_y: 1000.0 }),
            crs: Some("EPSG:2056".to_string()),
        }
    }

    pub(crate) fn tile(scene: &SceneRecord, row: i32, col: i32, cloud: f32) -> TileRecord {
        TileRecord {
            scene_id: scene.scene_id.clone(),
            date: scene.date,
            tile_row: row,
            tile_col: col,
            center_x: 500.0,
            center_y: 500.0,
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1000.0,
            max_y: 1000.0,
            cloud_pct: cloud,
            valid_pixel_pct: 100.0,
        }
    }

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_insert_and_order() {
        let mut db = db();
        let older = scene("b-older", "2024-01-01", 10.0);
        let newer = scene("a-newer", "2024-02-01", 30.0);
        let tiles = vec![tile(&newer, 1, 0, 30.0), tile(&newer, 0, 1, 30.0), tile(&older, 0, 0, 10.0)];
        db.insert_batch(&[older.clone(), newer.clone()], &tiles).unwrap();

        let scenes = db.scenes_by_date_desc().unwrap();
        assert_eq!(scenes, vec![newer.clone(), older.clone()]);

        let ordered: Vec<(String, i32, i32)> = db
            .tiles_ordered()
            .unwrap()
            .into_iter()
            .map(|t| (t.scene_id, t.tile_row, t.tile_col))
            .collect();
        assert_eq!(
            ordered,
            vec![
                ("a-newer".to_string(), 0, 1),
                ("a-newer".to_string(), 1, 0),
                ("b-older".to_string(), 0, 0),
            ]
        );
        assert_eq!(db.scene_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_null_bounds_round_trip() {
        let mut db = db();
        let mut empty = scene("empty", "2024-03-03", 0.0);
        empty.bounds = None;
        empty.total_tiles = 0;
        empty.min_cloud_pct = 100.0;
        empty.max_cloud_pct = 0.0;
        db.insert_batch(&[empty.clone()], &[]).unwrap();

        assert_eq!(db.scenes_by_date_desc().unwrap(), vec![empty]);
    }

    #[test]
    fn test_duplicate_scene_rolls_back_batch() {
        let mut db = db();
        let s = scene("dup", "2024-01-01", 5.0);
        db.insert_batch(&[s.clone()], &[]).unwrap();

        let other = scene("other", "2024-01-02", 5.0);
        assert!(db.insert_batch(&[other.clone(), s.clone()], &[tile(&other, 0, 0, 5.0)]).is_err());
        assert_eq!(db.scene_ids().unwrap().len(), 1);
        assert_eq!(db.tile_count().unwrap(), 0);
    }

    #[test]
    fn test_orphan_tile_is_rejected() {
        let mut db = db();
        let ghost = scene("ghost", "2024-01-01", 5.0);
        assert!(db.insert_batch(&[], &[tile(&ghost, 0, 0, 5.0)]).is_err());
    }

    #[test]
    fn test_stats() {
        let mut db = db();
        assert_eq!(db.stats().unwrap(), DatabaseStats::default());

        let a = scene("a", "2024-01-05", 20.0);
        let b = scene("b", "2024-03-01", 40.0);
        db.insert_batch(&[a, b], &[]).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_scenes, 2);
        assert_eq!(stats.earliest, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(stats.latest, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(stats.avg_cloud, Some(30.0));
        assert_eq!(stats.total_tiles, 2);
    }
}
