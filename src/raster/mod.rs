//! Single-band cloud-mask rasters and where they come from.

pub mod geotiff;
pub mod source;

use ndarray::Array2;
use thiserror::Error;

pub use source::{HttpRasterSource, RasterSource};

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TIFF: {0}")]
    Decode(#[from] tiff::TiffError),

    #[error("unsupported raster: {0}")]
    Unsupported(String),

    #[error("invalid georeferencing: {0}")]
    Georeference(String),

    #[error("raster exceeds {limit} bytes ({what})")]
    TooLarge { what: String, limit: usize },
}

/// Affine pixel-to-map transform, same coefficient order as GDAL/rasterio's
/// `Affine(a, b, c, d, e, f)`:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl GeoTransform {
    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 0.0, e: 1.0, f: 0.0 }
    }

    /// North-up transform from the upper-left corner and pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height,
            f: origin_y,
        }
    }

    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }
}

/// A decoded cloud-mask band with its georeferencing.
#[derive(Debug, Clone)]
pub struct CloudMask {
    /// Pixel values indexed `[row, col]`.
    pub data: Array2<u16>,
    pub transform: GeoTransform,
    /// `EPSG:<code>` when the GeoKeys name one.
    pub crs: Option<String>,
}

impl CloudMask {
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }
}
