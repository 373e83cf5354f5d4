//! Primary rating source: the companion ratings service.
//!
//! Serves community title ratings on a 0–10 scale by canonical id, and
//! episode ratings by `(seriesId, season, episode)`. Results flow through
//! two caches: a bounded in-process map for fast repeat hits and the
//! shared cache tier under `rating:{source}` keys. Misses are legitimate
//! results and are memoized in a scoped negative cache.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use super::memo::BoundedTtlMap;
use crate::{
    cache::{CacheKeys, CacheTier, CacheVersion},
    observability::metrics,
};

const SOURCE: &str = "ratings";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitleRating {
    /// 0–10 scale.
    pub rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<u64>,
}

pub struct RatingsClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    tier: Arc<CacheTier>,
    version: Arc<CacheVersion>,
    shared_ttl: Duration,
    local: BoundedTtlMap<TitleRating>,
    negative: BoundedTtlMap<()>,
}

impl RatingsClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        timeout_secs: u64,
        tier: Arc<CacheTier>,
        version: Arc<CacheVersion>,
        shared_ttl_secs: u64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
            tier,
            version,
            shared_ttl: Duration::from_secs(shared_ttl_secs),
            local: BoundedTtlMap::new(10_000, Duration::from_secs(600)),
            negative: BoundedTtlMap::new(10_000, Duration::from_secs(1_800)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Title rating by canonical id. `None` means the source has no
    /// rating for the item; infrastructure failures also degrade to
    /// `None` but are never memoized.
    pub async fn fetch_by_item_id(&self, item_id: &str) -> Option<TitleRating> {
        if let Some(rating) = self.local.get(item_id) {
            metrics::record_provider_lookup(SOURCE, "local-hit");
            return Some(rating);
        }
        if self.negative.get(item_id).is_some() {
            metrics::record_provider_lookup(SOURCE, "negative-hit");
            return None;
        }

        let key = CacheKeys::source_rating(&self.version.current(), SOURCE, item_id);
        if let Some(rating) = self.tier.get_json::<TitleRating>(&key).await {
            self.local.insert(item_id, rating.clone());
            metrics::record_provider_lookup(SOURCE, "shared-hit");
            return Some(rating);
        }

        let url = format!("{}/api/ratings/{}", self.base_url, item_id);
        match self.request(&url).await {
            Ok(Some(rating)) => {
                metrics::record_provider_lookup(SOURCE, "fetched");
                self.local.insert(item_id, rating.clone());
                self.tier.spawn_set_json(key, rating.clone(), self.shared_ttl);
                Some(rating)
            }
            Ok(None) => {
                metrics::record_provider_lookup(SOURCE, "miss");
                self.negative.insert(item_id, ());
                None
            }
            Err(e) => {
                metrics::record_provider_lookup(SOURCE, "error");
                tracing::debug!(item_id = %item_id, error = %e, "ratings lookup failed");
                None
            }
        }
    }

    /// Episode rating by series id, season, and episode number.
    pub async fn fetch_episode(
        &self,
        series_id: &str,
        season: u32,
        episode: u32,
    ) -> Option<TitleRating> {
        let memo_key = format!("{series_id}:{season}:{episode}");
        if let Some(rating) = self.local.get(&memo_key) {
            return Some(rating);
        }
        if self.negative.get(&memo_key).is_some() {
            return None;
        }

        let key = CacheKeys::source_rating(&self.version.current(), "ratings-episode", &memo_key);
        if let Some(rating) = self.tier.get_json::<TitleRating>(&key).await {
            self.local.insert(&memo_key, rating.clone());
            return Some(rating);
        }

        let url = format!(
            "{}/api/ratings/{}/episode/{}/{}",
            self.base_url, series_id, season, episode
        );
        match self.request(&url).await {
            Ok(Some(rating)) => {
                self.local.insert(&memo_key, rating.clone());
                self.tier.spawn_set_json(key, rating.clone(), self.shared_ttl);
                Some(rating)
            }
            Ok(None) => {
                self.negative.insert(&memo_key, ());
                None
            }
            Err(e) => {
                tracing::debug!(
                    series_id = %series_id,
                    season,
                    episode,
                    error = %e,
                    "episode rating lookup failed"
                );
                None
            }
        }
    }

    /// Liveness probe for /healthz.
    pub async fn health(&self) -> (bool, u64) {
        let start = std::time::Instant::now();
        let healthy = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);
        (healthy, start.elapsed().as_millis() as u64)
    }

    async fn request(&self, url: &str) -> Result<Option<TitleRating>, reqwest::Error> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;

        // The service answers `null` for titles it has never seen.
        let rating: Option<TitleRating> = response.json().await?;
        Ok(rating.filter(|r| r.rating.is_finite()))
    }
}
