//! Parquet storage of the scene and tile tables.
//!
//! Layout under the data directory:
//!
//! ```text
//! scenes.parquet                      sorted by date, newest first
//! tiles/scene_id=<id>/data_0.parquet  one partition per scene
//! ```

pub mod reader;
pub mod schema;
pub mod writer;

use chrono::{Datelike, NaiveDate};

pub use reader::{read_scenes, read_tiles};
pub use writer::{write_scenes, write_tiles, ParquetOptions};

const PARTITION_KEY: &str = "scene_id";
const PARTITION_FILE: &str = "data_0.parquet";

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub(crate) fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub(crate) fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

/// Hive-style directory name for a scene partition.
pub fn partition_dir_name(scene_id: &str) -> String {
    let mut encoded = String::with_capacity(scene_id.len());
    for byte in scene_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    format!("{}={}", PARTITION_KEY, encoded)
}

/// Inverse of [`partition_dir_name`]; `None` for foreign directories.
pub fn scene_id_from_dir_name(name: &str) -> Option<String> {
    let value = name.strip_prefix(PARTITION_KEY)?.strip_prefix('=')?;
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_names() {
        assert_eq!(partition_dir_name("2024-06-01t103021"), "scene_id=2024-06-01t103021");
        assert_eq!(partition_dir_name("a/b=c"), "scene_id=a%2Fb%3Dc");

        for id in ["2024-06-01t103021", "a/b=c", "with space", "100%"] {
            assert_eq!(scene_id_from_dir_name(&partition_dir_name(id)).as_deref(), Some(id));
        }
        assert_eq!(scene_id_from_dir_name("other=1"), None);
        assert_eq!(scene_id_from_dir_name("scene_id"), None);
    }

    #[test]
    fn test_date_days() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(date_to_days(epoch), 0);
        let d = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(date_to_days(d), 19875);
        assert_eq!(days_to_date(19875), Some(d));
    }
}
