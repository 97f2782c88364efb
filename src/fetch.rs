use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::Client;
use tokio::sync::Mutex;

use crate::config::FetchConfig;
use crate::models::{FeedItem, FeedSource};
use crate::normalize::normalize_entry;

const USER_AGENT: &str = "newswire/1.0";
const ACCEPT_HEADER: &str = "application/rss+xml, application/xml, text/xml";

struct CacheEntry {
    items: Vec<FeedItem>,
    fetched_at: i64,
}

/// Fetches and normalizes feed sources, with a short-lived per-source
/// in-memory cache. A failed fetch falls back to the stale cache entry
/// when one exists, so one flaky feed never empties the list.
pub struct FeedFetcher {
    client: Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl_ms: i64,
    max_items: usize,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
            ttl_ms: config.cache_ttl_secs as i64 * 1000,
            max_items: config.max_items_per_source,
        })
    }

    /// Fetch a single source, serving from cache while the entry is fresh.
    pub async fn fetch_one(&self, source: &FeedSource) -> Vec<FeedItem> {
        let now = Utc::now().timestamp_millis();

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&source.id) {
                if now - entry.fetched_at < self.ttl_ms {
                    debug!("Cache hit for source {}", source.id);
                    return entry.items.clone();
                }
            }
        }

        match self.fetch_live(source).await {
            Ok(items) => {
                let mut cache = self.cache.lock().await;
                cache.insert(
                    source.id.clone(),
                    CacheEntry {
                        items: items.clone(),
                        fetched_at: now,
                    },
                );
                items
            }
            Err(err) => {
                warn!("RSS fetch error for {}: {:#}", source.name, err);
                // Degrade to the stale entry rather than an empty panel
                let cache = self.cache.lock().await;
                cache
                    .get(&source.id)
                    .map(|entry| entry.items.clone())
                    .unwrap_or_default()
            }
        }
    }

    async fn fetch_live(&self, source: &FeedSource) -> Result<Vec<FeedItem>> {
        let response = self
            .client
            .get(&source.url)
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;

        let items: Vec<FeedItem> = feed
            .entries
            .iter()
            .take(self.max_items)
            .enumerate()
            .map(|(index, entry)| normalize_entry(entry, index, source))
            .collect();

        debug!("Fetched {} items from {}", items.len(), source.name);
        Ok(items)
    }

    /// Fetch every enabled source concurrently and merge the results,
    /// newest first. Per-source failures are absorbed by `fetch_one`, so
    /// the join always settles.
    pub async fn fetch_many(&self, sources: &[FeedSource]) -> Vec<FeedItem> {
        let enabled: Vec<&FeedSource> = sources.iter().filter(|source| source.enabled).collect();
        let results = join_all(enabled.iter().map(|source| self.fetch_one(source))).await;

        let mut items: Vec<FeedItem> = results.into_iter().flatten().collect();
        sort_newest_first(&mut items);
        items
    }

    /// Drop the cached items for one source, or for all sources. Forces a
    /// live re-fetch on the next call; the translation cache and archive
    /// are deliberately untouched.
    pub async fn clear(&self, source_id: Option<&str>) {
        let mut cache = self.cache.lock().await;
        match source_id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
        info!("Fetch cache cleared ({})", source_id.unwrap_or("all sources"));
    }

    #[cfg(test)]
    async fn seed_cache(&self, source_id: &str, items: Vec<FeedItem>, fetched_at: i64) {
        let mut cache = self.cache.lock().await;
        cache.insert(source_id.to_string(), CacheEntry { items, fetched_at });
    }
}

/// Stable descending sort by publish time; items with an empty or
/// unparseable date sort to the end.
pub fn sort_newest_first(items: &mut [FeedItem]) {
    items.sort_by_key(|item| std::cmp::Reverse(pub_date_millis(&item.pub_date)));
}

fn pub_date_millis(pub_date: &str) -> i64 {
    DateTime::parse_from_rfc3339(pub_date)
        .map(|date| date.timestamp_millis())
        .unwrap_or(0)
}
