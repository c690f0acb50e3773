//! Cloud-mask statistics for Sentinel-2 scenes published on a STAC API.
//!
//! Scenes are discovered through [`catalog`], their cloud-mask rasters are
//! decoded by [`raster`] and cut into fixed-size blocks by [`tiling`]. The
//! resulting scene and tile tables are merged in an in-memory [`db`] and
//! persisted as Parquet by [`columnar`]. [`update`] drives both the initial
//! build and the incremental update.

pub mod catalog;
pub mod columnar;
pub mod config;
pub mod db;
pub mod export;
pub mod logging;
pub mod raster;
pub mod schedule;
pub mod tiling;
pub mod update;
