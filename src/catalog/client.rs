use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

use super::types::{ItemCollection, Link};
use super::{AssetMatcher, SceneCatalog, SceneRef, SearchQuery};
use crate::config::StacConfig;

/// Blocking client for the `/search` endpoint of a STAC API.
pub struct StacClient {
    agent: ureq::Agent,
    base_url: String,
    page_size: usize,
    matcher: AssetMatcher,
}

impl StacClient {
    pub fn from_config(config: &StacConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();

        Self {
            agent,
            base_url: config.url.trim_end_matches('/').to_string(),
            page_size: config.page_size.max(1),
            matcher: AssetMatcher::new(&config.asset_key_markers, &config.asset_title_markers),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }

    fn first_page(&self, query: &SearchQuery) -> Result<ItemCollection> {
        let limit = page_limit(self.page_size, query.max_items, 0);
        let mut request = self
            .agent
            .get(&self.search_url())
            .query("collections", &query.collection)
            .query("limit", &limit.to_string());
        if let Some(ref datetime) = query.datetime {
            request = request.query("datetime", datetime);
        }

        request
            .call()
            .with_context(|| format!("STAC search failed at {}", self.search_url()))?
            .into_json()
            .context("Failed to parse STAC search response")
    }

    fn follow(&self, link: &Link) -> Result<ItemCollection> {
        let response = match PageRequest::from_link(link) {
            PageRequest::Post { href, body } => self.agent.post(href).send_json(body),
            PageRequest::Get { href } => self.agent.get(href).call(),
        };

        response
            .with_context(|| format!("STAC next page failed at {}", link.href))?
            .into_json()
            .context("Failed to parse STAC search page")
    }
}

/// How a `next` link is followed.
#[derive(Debug, Clone, PartialEq)]
enum PageRequest<'a> {
    Get { href: &'a str },
    Post { href: &'a str, body: serde_json::Value },
}

impl<'a> PageRequest<'a> {
    fn from_link(link: &'a Link) -> Self {
        let is_post = link
            .method
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("POST"));

        if is_post {
            PageRequest::Post {
                href: &link.href,
                body: link.body.clone().unwrap_or(serde_json::Value::Null),
            }
        } else {
            PageRequest::Get { href: &link.href }
        }
    }
}

/// Page size for the next request, honouring the remaining item cap.
fn page_limit(page_size: usize, max_items: Option<usize>, fetched: usize) -> usize {
    match max_items {
        Some(max) => page_size.min(max.saturating_sub(fetched)).max(1),
        None => page_size,
    }
}

/// Walk `first` and the pages behind its `next` links, collecting scenes
/// until the item cap, an empty page, or the last page. Returns the scenes
/// and the number of items seen.
fn collect_pages<F>(
    first: ItemCollection,
    max_items: Option<usize>,
    matcher: &AssetMatcher,
    mut next_page: F,
) -> Result<(Vec<SceneRef>, usize)>
where
    F: FnMut(&Link) -> Result<ItemCollection>,
{
    let capped = |seen: usize| max_items.is_some_and(|max| seen >= max);

    let mut scenes = Vec::new();
    let mut seen_items = 0usize;
    let mut page = first;

    loop {
        if page.features.is_empty() {
            break;
        }

        for item in &page.features {
            if capped(seen_items) {
                break;
            }
            seen_items += 1;
            if let Some(scene) = matcher.scene_ref(item) {
                scenes.push(scene);
            }
        }

        if capped(seen_items) {
            debug!("Item cap of {} reached", seen_items);
            break;
        }

        match page.next_link() {
            Some(link) => {
                debug!("Following next page: {}", link.href);
                let link = link.clone();
                page = next_page(&link)?;
            }
            None => break,
        }
    }

    Ok((scenes, seen_items))
}

impl SceneCatalog for StacClient {
    fn fetch_scenes(&self, query: &SearchQuery) -> Result<Vec<SceneRef>> {
        info!("Searching collection {} at {}", query.collection, self.base_url);
        if let Some(ref datetime) = query.datetime {
            info!("Datetime window: {}", datetime);
        }

        let first = self.first_page(query)?;
        let (scenes, seen_items) =
            collect_pages(first, query.max_items, &self.matcher, |link| self.follow(link))?;

        info!("Found {} scenes with a cloud mask in {} items", scenes.len(), seen_items);
        Ok(scenes)
    }
}
