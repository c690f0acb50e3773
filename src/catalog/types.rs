//! STAC API response types (the subset the scraper reads).

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::{Map, Value};

/// One page of a `/search` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemCollection {
    #[serde(default)]
    pub features: Vec<Item>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl ItemCollection {
    pub fn next_link(&self) -> Option<&Link> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Kept as a raw map so iteration follows document order.
    #[serde(default)]
    pub assets: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl Item {
    /// Assets in document order; entries that are not valid assets are skipped.
    pub fn assets(&self) -> impl Iterator<Item = (&str, Asset)> + '_ {
        self.assets.iter().filter_map(|(key, value)| {
            serde_json::from_value::<Asset>(value.clone())
                .ok()
                .map(|asset| (key.as_str(), asset))
        })
    }

    /// Acquisition date from `datetime`, or `start_datetime` for interval items.
    pub fn acquisition_date(&self) -> Option<NaiveDate> {
        ["datetime", "start_datetime"]
            .iter()
            .filter_map(|key| self.properties.get(*key).and_then(Value::as_str))
            .find_map(parse_stac_date)
    }
}

fn parse_stac_date(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    // Some catalogs omit the offset.
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}
