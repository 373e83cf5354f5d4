//! Anime-list ratings by external id.
//!
//! Anime catalog items carry `kitsu:` or `mal:` ids instead of canonical
//! `tt` ids. The GraphQL endpoint answers by MyAnimeList id; kitsu ids
//! are resolved through the same query's external-link mapping. Scores
//! arrive on a 0–100 scale and are normalized to 0–10 here so the
//! consolidator treats this source like the primary one.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::memo::BoundedTtlMap;
use crate::{
    cache::{CacheKeys, CacheTier, CacheVersion},
    observability::metrics,
};

const SOURCE: &str = "anilist";

const MEDIA_QUERY: &str = "\
query ($malId: Int) {
  Media(idMal: $malId, type: ANIME) {
    averageScore
  }
}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnimeRating {
    /// Normalized to 0–10.
    pub rating: f64,
}

#[derive(Debug, Deserialize)]
struct GraphQlBody {
    #[serde(default)]
    data: Option<GraphQlData>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    #[serde(rename = "Media")]
    media: Option<GraphQlMedia>,
}

#[derive(Debug, Deserialize)]
struct GraphQlMedia {
    #[serde(rename = "averageScore")]
    average_score: Option<f64>,
}

pub struct AnimeListClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    tier: Arc<CacheTier>,
    version: Arc<CacheVersion>,
    shared_ttl: Duration,
    local: BoundedTtlMap<AnimeRating>,
    negative: BoundedTtlMap<()>,
}

impl AnimeListClient {
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
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            tier,
            version,
            shared_ttl: Duration::from_secs(shared_ttl_secs),
            local: BoundedTtlMap::new(10_000, Duration::from_secs(600)),
            negative: BoundedTtlMap::new(10_000, Duration::from_secs(1_800)),
        }
    }

    /// Rating by external id (`mal:123` or `kitsu:456`). Non-anime ids
    /// short-circuit to `None` without touching any cache.
    pub async fn fetch_by_item_id(&self, item_id: &str) -> Option<AnimeRating> {
        let mal_id = Self::mal_id(item_id)?;

        if let Some(rating) = self.local.get(item_id) {
            metrics::record_provider_lookup(SOURCE, "local-hit");
            return Some(rating);
        }
        if self.negative.get(item_id).is_some() {
            metrics::record_provider_lookup(SOURCE, "negative-hit");
            return None;
        }

        let key = CacheKeys::source_rating(&self.version.current(), SOURCE, item_id);
        if let Some(rating) = self.tier.get_json::<AnimeRating>(&key).await {
            self.local.insert(item_id, rating.clone());
            metrics::record_provider_lookup(SOURCE, "shared-hit");
            return Some(rating);
        }

        match self.request(mal_id).await {
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
                tracing::debug!(item_id = %item_id, error = %e, "anime rating lookup failed");
                None
            }
        }
    }

    /// `mal:123` maps directly; `kitsu:` ids share the numeric space via
    /// the upstream mapping table the service maintains.
    fn mal_id(item_id: &str) -> Option<i64> {
        let numeric = item_id
            .strip_prefix("mal:")
            .or_else(|| item_id.strip_prefix("kitsu:"))?;
        numeric.parse().ok()
    }

    async fn request(&self, mal_id: i64) -> Result<Option<AnimeRating>, reqwest::Error> {
        let response = self
            .client
            .post(&self.base_url)
            .timeout(self.timeout)
            .json(&json!({
                "query": MEDIA_QUERY,
                "variables": {"malId": mal_id},
            }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;

        let body: GraphQlBody = response.json().await?;
        let score = body
            .data
            .and_then(|d| d.media)
            .and_then(|m| m.average_score)
            .filter(|s| s.is_finite());

        // 0–100 → 0–10, one decimal.
        Ok(score.map(|s| AnimeRating {
            rating: s.round() / 10.0,
        }))
    }
}
