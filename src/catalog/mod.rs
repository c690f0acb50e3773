//! Catalog fetcher: finds cloud-mask scenes in a STAC collection.

pub mod client;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};

pub use client::StacClient;
pub use types::{Asset, Item, ItemCollection, Link};

/// A catalog item that carries a cloud-mask raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRef {
    pub scene_id: String,
    pub date: NaiveDate,
    pub cog_url: String,
}

/// Parameters of a `/search` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub collection: String,
    /// ISO-8601 interval `start/end`.
    pub datetime: Option<String>,
    pub max_items: Option<usize>,
}

impl SearchQuery {
    /// Whole collection, capped at `max_items`.
    pub fn capped(collection: &str, max_items: usize) -> Self {
        Self {
            collection: collection.to_string(),
            datetime: None,
            max_items: Some(max_items),
        }
    }

    /// Items acquired in the last `days` days before `now`.
    pub fn last_days(collection: &str, days: i64, now: DateTime<Utc>) -> Self {
        let start = now - Duration::days(days);
        Self {
            collection: collection.to_string(),
            datetime: Some(format!(
                "{}/{}",
                start.format("%Y-%m-%dT%H:%M:%SZ"),
                now.format("%Y-%m-%dT%H:%M:%SZ")
            )),
            max_items: None,
        }
    }
}

/// Source of scenes for the updater.
pub trait SceneCatalog {
    fn fetch_scenes(&self, query: &SearchQuery) -> Result<Vec<SceneRef>>;
}

/// Case-insensitive substring markers that identify the cloud-mask asset.
#[derive(Debug, Clone)]
pub struct AssetMatcher {
    key_markers: Vec<String>,
    title_markers: Vec<String>,
}

impl Default for AssetMatcher {
    fn default() -> Self {
        Self::new(&["cloudmask".to_string()], &["cloud mask".to_string()])
    }
}

impl AssetMatcher {
    pub fn new(key_markers: &[String], title_markers: &[String]) -> Self {
        Self {
            key_markers: key_markers.iter().map(|m| m.to_lowercase()).collect(),
            title_markers: title_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn matches(&self, key: &str, asset: &Asset) -> bool {
        let key = key.to_lowercase();
        if self.key_markers.iter().any(|m| key.contains(m.as_str())) {
            return true;
        }
        match &asset.title {
            Some(title) => {
                let title = title.to_lowercase();
                self.title_markers.iter().any(|m| title.contains(m.as_str()))
            }
            None => false,
        }
    }

    /// First matching asset in document order.
    pub fn find(&self, item: &Item) -> Option<Asset> {
        item.assets()
            .find(|(key, asset)| self.matches(key, asset))
            .map(|(_, asset)| asset)
    }

    /// Turn an item into a scene, or `None` if it has no cloud mask or no date.
    pub fn scene_ref(&self, item: &Item) -> Option<SceneRef> {
        let asset = match self.find(item) {
            Some(asset) => asset,
            None => {
                tracing::debug!("Item {} has no cloud-mask asset", item.id);
                return None;
            }
        };
        let date = match item.acquisition_date() {
            Some(date) => date,
            None => {
                tracing::warn!("Item {} has no usable datetime, skipping", item.id);
                return None;
            }
        };
        Some(SceneRef {
            scene_id: item.id.clone(),
            date,
            cog_url: asset.href,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(json: serde_json::Value) -> Item {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_first_match_by_key_or_title() {
        let item = item(serde_json::json!({
            "id": "scene-1",
            "properties": { "datetime": "2024-05-02T10:00:00Z" },
            "assets": {
                "thumbnail": { "href": "http://x/thumb.png", "title": "Preview" },
                "masks": { "href": "http://x/first.tif", "title": "Sentinel-2 Cloud Mask" },
                "s2_CloudMask_10m": { "href": "http://x/second.tif" }
            }
        }));

        let matcher = AssetMatcher::default();
        let scene = matcher.scene_ref(&item).unwrap();
        assert_eq!(scene.scene_id, "scene-1");
        assert_eq!(scene.cog_url, "http://x/first.tif");
        assert_eq!(scene.date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
    }

    #[test]
    fn test_key_match_is_case_insensitive() {
        let matcher = AssetMatcher::default();
        let asset = Asset { href: "h".to_string(), title: None };
        assert!(matcher.matches("S2_CLOUDMASK", &asset));
        assert!(!matcher.matches("cloud_mask", &asset));

        let titled = Asset { href: "h".to_string(), title: Some("CLOUD MASK 10m".to_string()) };
        assert!(matcher.matches("b01", &titled));
    }

    #[test]
    fn test_item_without_mask_is_dropped() {
        let item = item(serde_json::json!({
            "id": "scene-2",
            "properties": { "datetime": "2024-05-02T10:00:00Z" },
            "assets": { "rgb": { "href": "http://x/rgb.tif", "title": "True colour" } }
        }));
        assert!(AssetMatcher::default().scene_ref(&item).is_none());
    }

    #[test]
    fn test_last_days_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 6, 30, 0).unwrap();
        let query = SearchQuery::last_days("col", 2, now);
        assert_eq!(
            query.datetime.as_deref(),
            Some("2024-03-08T06:30:00Z/2024-03-10T06:30:00Z")
        );
        assert_eq!(query.max_items, None);
    }
}
