//! GeoTIFF decoding: band 1 plus the affine transform and EPSG code.

use ndarray::Array2;
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

use super::{CloudMask, GeoTransform, RasterError};

const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const RASTER_PIXEL_IS_POINT: u16 = 2;

fn limits(max_bytes: usize) -> Limits {
    let mut limits = Limits::default();
    limits.decoding_buffer_size = max_bytes;
    limits
}

/// Decode an in-memory GeoTIFF into a single-band cloud mask. Images whose
/// decoded samples would exceed `max_bytes` are rejected.
pub fn decode(bytes: &[u8], max_bytes: usize) -> Result<CloudMask, RasterError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(limits(max_bytes));

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Err(RasterError::Unsupported("empty image".to_string()));
    }
    // At least one byte per pixel; the decoder enforces the exact size.
    if width.saturating_mul(height) > max_bytes {
        return Err(RasterError::TooLarge {
            what: format!("{}x{} pixels", width, height),
            limit: max_bytes,
        });
    }

    let geokeys = read_geokeys(&mut decoder)?;
    let transform = read_transform(&mut decoder, &geokeys)?;
    let crs = epsg_code(&geokeys).map(|code| format!("EPSG:{}", code));

    let decoded = decoder.read_image().map_err(|e| match e {
        tiff::TiffError::LimitsExceeded => RasterError::TooLarge {
            what: format!("{}x{} decoded samples", width, height),
            limit: max_bytes,
        },
        other => RasterError::Decode(other),
    })?;
    let samples: Vec<u16> = match decoded {
        DecodingResult::U8(v) => v.into_iter().map(u16::from).collect(),
        DecodingResult::U16(v) => v,
        _ => {
            return Err(RasterError::Unsupported(
                "only 8- and 16-bit unsigned samples are supported".to_string(),
            ))
        }
    };

    let pixels = width * height;
    if samples.is_empty() || samples.len() % pixels != 0 {
        return Err(RasterError::Unsupported(format!(
            "{} samples for a {}x{} image",
            samples.len(),
            width,
            height
        )));
    }
    let band_count = samples.len() / pixels;

    // Chunky layout: take the first sample of each pixel.
    let band: Vec<u16> = if band_count == 1 {
        samples
    } else {
        samples.into_iter().step_by(band_count).collect()
    };

    let data = Array2::from_shape_vec((height, width), band)
        .map_err(|e| RasterError::Unsupported(e.to_string()))?;

    Ok(CloudMask { data, transform, crs })
}

fn read_f64_tag<R>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Option<Vec<f64>>, RasterError>
where
    R: std::io::Read + std::io::Seek,
{
    match decoder.find_tag(tag)? {
        Some(value) => Ok(Some(value.into_f64_vec()?)),
        None => Ok(None),
    }
}

/// GeoKey id → short value. Keys stored in the double/ascii param tags are ignored.
fn read_geokeys<R>(decoder: &mut Decoder<R>) -> Result<Vec<(u16, u16)>, RasterError>
where
    R: std::io::Read + std::io::Seek,
{
    let directory = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
        Some(value) => value.into_u16_vec()?,
        None => return Ok(Vec::new()),
    };
    Ok(parse_geokey_directory(&directory))
}

fn parse_geokey_directory(directory: &[u16]) -> Vec<(u16, u16)> {
    if directory.len() < 4 {
        return Vec::new();
    }
    let count = directory[3] as usize;
    directory[4..]
        .chunks_exact(4)
        .take(count)
        .filter(|entry| entry[1] == 0)
        .map(|entry| (entry[0], entry[3]))
        .collect()
}

fn geokey(geokeys: &[(u16, u16)], key: u16) -> Option<u16> {
    geokeys.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Projected CRS wins over the geographic one. 32767 means user-defined.
fn epsg_code(geokeys: &[(u16, u16)]) -> Option<u16> {
    [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY]
        .iter()
        .filter_map(|key| geokey(geokeys, *key))
        .find(|code| *code != 0 && *code != 32767)
}

fn read_transform<R>(
    decoder: &mut Decoder<R>,
    geokeys: &[(u16, u16)],
) -> Result<GeoTransform, RasterError>
where
    R: std::io::Read + std::io::Seek,
{
    let mut transform = if let Some(m) = read_f64_tag(decoder, Tag::ModelTransformationTag)? {
        if m.len() < 16 {
            return Err(RasterError::Georeference(format!(
                "ModelTransformation has {} values, expected 16",
                m.len()
            )));
        }
        GeoTransform { a: m[0], b: m[1], c: m[3], d: m[4], e: m[5], f: m[7] }
    } else {
        let tiepoint = read_f64_tag(decoder, Tag::ModelTiepointTag)?;
        let scale = read_f64_tag(decoder, Tag::ModelPixelScaleTag)?;
        match (tiepoint, scale) {
            (Some(tp), Some(scale)) => {
                if tp.len() < 6 || scale.len() < 2 {
                    return Err(RasterError::Georeference(
                        "truncated tiepoint or pixel scale".to_string(),
                    ));
                }
                let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
                let (sx, sy) = (scale[0], scale[1]);
                GeoTransform::north_up(x - i * sx, y + j * sy, sx, sy)
            }
            _ => return Ok(GeoTransform::identity()),
        }
    };

    // PixelIsPoint tiepoints refer to pixel centres; shift to the corner.
    if geokey(geokeys, GT_RASTER_TYPE_KEY) == Some(RASTER_PIXEL_IS_POINT) {
        let (half_x, half_y) = transform.apply(-0.5, -0.5);
        transform.c = half_x;
        transform.f = half_y;
    }

    Ok(transform)
}

/// Georeferencing written into a fixture.
#[cfg(test)]
pub(crate) enum FixtureGeoref {
    /// North-up tiepoint at pixel (0, 0) plus square pixel size.
    Tiepoint { origin: (f64, f64), pixel_size: f64 },
    /// Row-major 4x4 ModelTransformation matrix.
    Matrix([f64; 16]),
}

/// Write a single-band 16-bit GeoTIFF with the given short GeoKeys, for fixtures.
#[cfg(test)]
pub(crate) fn write_fixture(
    path: &std::path::Path,
    data: &Array2<u16>,
    georef: &FixtureGeoref,
    geokeys: &[(u16, u16)],
) {
    use tiff::encoder::{colortype, TiffEncoder};

    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let (height, width) = data.dim();
        let mut image = encoder
            .new_image::<colortype::Gray16>(width as u32, height as u32)
            .unwrap();
        match georef {
            FixtureGeoref::Tiepoint { origin, pixel_size } => {
                image
                    .encoder()
                    .write_tag(Tag::ModelPixelScaleTag, &[*pixel_size, *pixel_size, 0.0][..])
                    .unwrap();
                image
                    .encoder()
                    .write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, origin.0, origin.1, 0.0][..])
                    .unwrap();
            }
            FixtureGeoref::Matrix(m) => {
                image
                    .encoder()
                    .write_tag(Tag::ModelTransformationTag, &m[..])
                    .unwrap();
            }
        }
        if !geokeys.is_empty() {
            let mut directory = vec![1u16, 1, 0, geokeys.len() as u16];
            for (key, value) in geokeys {
                directory.extend_from_slice(&[*key, 0, 1, *value]);
            }
            image
                .encoder()
                .write_tag(Tag::GeoKeyDirectoryTag, &directory[..])
                .unwrap();
        }
        let pixels: Vec<u16> = data.iter().copied().collect();
        image.write_data(&pixels).unwrap();
    }
    std::fs::write(path, buf.into_inner()).unwrap();
}

/// North-up fixture with an optional projected EPSG code.
#[cfg(test)]
pub(crate) fn write_test_geotiff(
    path: &std::path::Path,
    data: &Array2<u16>,
    origin: (f64, f64),
    pixel_size: f64,
    epsg: Option<u16>,
) {
    let geokeys: Vec<(u16, u16)> = epsg.map(|code| (PROJECTED_CS_TYPE_KEY, code)).into_iter().collect();
    write_fixture(path, data, &FixtureGeoref::Tiepoint { origin, pixel_size }, &geokeys);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LIMIT: usize = 1 << 20;

    #[test]
    fn test_parse_geokey_directory() {
        let dir = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 2056];
        let keys = parse_geokey_directory(&dir);
        assert_eq!(keys, vec![(1024, 1), (1025, 1), (3072, 2056)]);
        assert_eq!(epsg_code(&keys), Some(2056));
    }

    #[test]
    fn test_user_defined_crs_is_not_an_epsg_code() {
        let keys = vec![(PROJECTED_CS_TYPE_KEY, 32767), (GEOGRAPHIC_TYPE_KEY, 4326)];
        assert_eq!(epsg_code(&keys), Some(4326));
        assert_eq!(epsg_code(&[]), None);
    }

    #[test]
    fn test_decode_written_geotiff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.tif");
        let data = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as u16);
        write_test_geotiff(&path, &data, (2_600_000.0, 1_200_000.0), 10.0, Some(2056));

        let mask = decode(&std::fs::read(&path).unwrap(), LIMIT).unwrap();
        assert_eq!(mask.height(), 3);
        assert_eq!(mask.width(), 4);
        assert_eq!(mask.data[[2, 3]], 11);
        assert_eq!(mask.crs.as_deref(), Some("EPSG:2056"));
        assert_eq!(
            mask.transform,
            GeoTransform::north_up(2_600_000.0, 1_200_000.0, 10.0, 10.0)
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"definitely not a tiff", LIMIT).is_err());
    }

    #[test]
    fn test_model_transformation_matrix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rotated.tif");
        let matrix = [
            10.0, 2.0, 0.0, 2_600_000.0,
            1.0, -10.0, 0.0, 1_200_000.0,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        write_fixture(&path, &Array2::zeros((2, 2)), &FixtureGeoref::Matrix(matrix), &[]);

        let mask = decode(&std::fs::read(&path).unwrap(), LIMIT).unwrap();
        assert_eq!(
            mask.transform,
            GeoTransform { a: 10.0, b: 2.0, c: 2_600_000.0, d: 1.0, e: -10.0, f: 1_200_000.0 }
        );
        assert_eq!(mask.crs, None);
    }

    #[test]
    fn test_pixel_is_point_shifts_to_corner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("point.tif");
        let georef = FixtureGeoref::Tiepoint { origin: (2_600_005.0, 1_199_995.0), pixel_size: 10.0 };
        let geokeys = [(GT_RASTER_TYPE_KEY, RASTER_PIXEL_IS_POINT), (PROJECTED_CS_TYPE_KEY, 2056)];
        write_fixture(&path, &Array2::zeros((2, 2)), &georef, &geokeys);

        let mask = decode(&std::fs::read(&path).unwrap(), LIMIT).unwrap();
        assert_eq!(
            mask.transform,
            GeoTransform::north_up(2_600_000.0, 1_200_000.0, 10.0, 10.0)
        );
        assert_eq!(mask.crs.as_deref(), Some("EPSG:2056"));
    }

    #[test]
    fn test_pixel_is_area_is_not_shifted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("area.tif");
        let georef = FixtureGeoref::Tiepoint { origin: (2_600_005.0, 1_199_995.0), pixel_size: 10.0 };
        write_fixture(&path, &Array2::zeros((2, 2)), &georef, &[(GT_RASTER_TYPE_KEY, 1)]);

        let mask = decode(&std::fs::read(&path).unwrap(), LIMIT).unwrap();
        assert_eq!(
            mask.transform,
            GeoTransform::north_up(2_600_005.0, 1_199_995.0, 10.0, 10.0)
        );
    }

    #[test]
    fn test_oversized_raster_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.tif");
        write_test_geotiff(&path, &Array2::zeros((64, 64)), (0.0, 0.0), 10.0, None);
        let bytes = std::fs::read(&path).unwrap();

        // 4096 pixels pass the dimension check but need 8192 bytes as u16.
        let err = decode(&bytes, 5000).unwrap_err();
        assert!(matches!(err, RasterError::TooLarge { .. }));
        let err = decode(&bytes, 1000).unwrap_err();
        assert!(matches!(err, RasterError::TooLarge { .. }));
        assert!(decode(&bytes, 1 << 14).is_ok());
    }
}
