//! Aggregated metadata by canonical id and region: critic scores
//! (Rotten Tomatoes %, Metacritic), release date, and streaming
//! availability. Region participates in the cache key because streaming
//! catalogs differ per country.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use super::memo::BoundedTtlMap;
use crate::{
    cache::{CacheKeys, CacheTier, CacheVersion},
    observability::metrics,
};

const SOURCE: &str = "metadata";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtraMetadata {
    /// Rotten Tomatoes score, 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotten_tomatoes: Option<f64>,
    /// Metacritic score, 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metacritic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub streaming: Vec<String>,
}

impl ExtraMetadata {
    fn is_empty(&self) -> bool {
        self.rotten_tomatoes.is_none()
            && self.metacritic.is_none()
            && self.release_date.is_none()
            && self.streaming.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct MetadataBody {
    #[serde(default)]
    ratings: MetadataRatings,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    streaming: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataRatings {
    #[serde(default)]
    rotten_tomatoes: Option<f64>,
    #[serde(default)]
    metacritic: Option<f64>,
}

pub struct MetadataClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    tier: Arc<CacheTier>,
    version: Arc<CacheVersion>,
    shared_ttl: Duration,
    local: BoundedTtlMap<ExtraMetadata>,
    negative: BoundedTtlMap<()>,
}

impl MetadataClient {
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

    pub async fn fetch_by_item_id(&self, item_id: &str, region: &str) -> Option<ExtraMetadata> {
        let memo_key = format!("{item_id}:{region}");
        if let Some(metadata) = self.local.get(&memo_key) {
            metrics::record_provider_lookup(SOURCE, "local-hit");
            return Some(metadata);
        }
        if self.negative.get(&memo_key).is_some() {
            metrics::record_provider_lookup(SOURCE, "negative-hit");
            return None;
        }

        let key = CacheKeys::source_data(&self.version.current(), SOURCE, item_id, Some(region));
        if let Some(metadata) = self.tier.get_json::<ExtraMetadata>(&key).await {
            self.local.insert(&memo_key, metadata.clone());
            metrics::record_provider_lookup(SOURCE, "shared-hit");
            return Some(metadata);
        }

        let url = format!(
            "{}/api/title/{}?region={}",
            self.base_url, item_id, region
        );
        match self.request(&url).await {
            Ok(Some(metadata)) => {
                metrics::record_provider_lookup(SOURCE, "fetched");
                self.local.insert(&memo_key, metadata.clone());
                self.tier.spawn_set_json(key, metadata.clone(), self.shared_ttl);
                Some(metadata)
            }
            Ok(None) => {
                metrics::record_provider_lookup(SOURCE, "miss");
                self.negative.insert(&memo_key, ());
                None
            }
            Err(e) => {
                metrics::record_provider_lookup(SOURCE, "error");
                tracing::debug!(item_id = %item_id, region = %region, error = %e, "metadata lookup failed");
                None
            }
        }
    }

    async fn request(&self, url: &str) -> Result<Option<ExtraMetadata>, reqwest::Error> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;

        let body: MetadataBody = response.json().await?;
        let metadata = ExtraMetadata {
            rotten_tomatoes: body.ratings.rotten_tomatoes.filter(|s| s.is_finite()),
            metacritic: body.ratings.metacritic.filter(|s| s.is_finite()),
            release_date: body.release_date.filter(|d| !d.is_empty()),
            streaming: body.streaming,
        };

        if metadata.is_empty() {
            Ok(None)
        } else {
            Ok(Some(metadata))
        }
    }
}
