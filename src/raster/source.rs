use std::io::Read;
use std::path::Path;
use std::time::Duration;

use super::{geotiff, CloudMask, RasterError};

/// Opens a cloud-mask raster by URL.
pub trait RasterSource {
    fn open(&self, url: &str) -> Result<CloudMask, RasterError>;
}

/// Reads `http(s)://` URLs over HTTP and everything else from disk.
pub struct HttpRasterSource {
    agent: ureq::Agent,
    max_bytes: usize,
}

impl HttpRasterSource {
    /// `max_bytes` caps both the download and the decoded samples.
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent, max_bytes }
    }

    fn too_large(&self, url: &str) -> RasterError {
        RasterError::TooLarge {
            what: format!("download of {}", url),
            limit: self.max_bytes,
        }
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, RasterError> {
        let response = self.agent.get(url).call().map_err(|e| RasterError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let declared = response
            .header("Content-Length")
            .and_then(|len| len.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_bytes) {
            return Err(self.too_large(url));
        }

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| RasterError::Fetch {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if bytes.len() > self.max_bytes {
            return Err(self.too_large(url));
        }
        Ok(bytes)
    }

    fn read_file(path: &Path) -> Result<Vec<u8>, RasterError> {
        std::fs::read(path).map_err(|source| RasterError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

fn is_remote(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

impl RasterSource for HttpRasterSource {
    fn open(&self, url: &str) -> Result<CloudMask, RasterError> {
        let bytes = if is_remote(url) {
            self.fetch(url)?
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            Self::read_file(Path::new(path))?
        };
        tracing::debug!("Read {} bytes from {}", bytes.len(), url);
        geotiff::decode(&bytes, self.max_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::geotiff::write_test_geotiff;
    use ndarray::Array2;
    use tempfile::tempdir;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://data.example/mask.tif"));
        assert!(is_remote("HTTP://data.example/mask.tif"));
        assert!(!is_remote("file:///tmp/mask.tif"));
        assert!(!is_remote("/tmp/mask.tif"));
    }

    #[test]
    fn test_open_local_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.tif");
        write_test_geotiff(&path, &Array2::from_elem((5, 5), 1), (0.0, 50.0), 10.0, None);

        let source = HttpRasterSource::new(Duration::from_secs(5), 1 << 20);
        let plain = source.open(path.to_str().unwrap()).unwrap();
        let url = format!("file://{}", path.display());
        let prefixed = source.open(&url).unwrap();

        assert_eq!(plain.data, prefixed.data);
        assert_eq!(plain.crs, None);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = HttpRasterSource::new(Duration::from_secs(5), 1 << 20);
        let err = source.open("/nonexistent/cloudmask.tif").unwrap_err();
        assert!(matches!(err, RasterError::Io { .. }));
    }

    #[test]
    fn test_size_limit_applies_to_local_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.tif");
        write_test_geotiff(&path, &Array2::from_elem((100, 100), 1), (0.0, 0.0), 10.0, None);

        let small = HttpRasterSource::new(Duration::from_secs(5), 4096);
        let err = small.open(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, RasterError::TooLarge { .. }));
    }
}
