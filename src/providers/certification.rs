//! MPAA/certification lookup by canonical id.

use std::{sync::Arc, time::Duration};

use serde::Deserialize;

use super::memo::BoundedTtlMap;
use crate::{
    cache::{CacheKeys, CacheTier, CacheVersion},
    observability::metrics,
};

const SOURCE: &str = "certification";

#[derive(Debug, Deserialize)]
struct CertificationBody {
    certification: Option<String>,
}

pub struct CertificationClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    tier: Arc<CacheTier>,
    version: Arc<CacheVersion>,
    shared_ttl: Duration,
    local: BoundedTtlMap<String>,
    negative: BoundedTtlMap<()>,
}

impl CertificationClient {
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

    pub async fn fetch_by_item_id(&self, item_id: &str) -> Option<String> {
        if let Some(certification) = self.local.get(item_id) {
            metrics::record_provider_lookup(SOURCE, "local-hit");
            return Some(certification);
        }
        if self.negative.get(item_id).is_some() {
            metrics::record_provider_lookup(SOURCE, "negative-hit");
            return None;
        }

        let key = CacheKeys::source_data(&self.version.current(), SOURCE, item_id, None);
        if let Some(certification) = self.tier.get_json::<String>(&key).await {
            self.local.insert(item_id, certification.clone());
            metrics::record_provider_lookup(SOURCE, "shared-hit");
            return Some(certification);
        }

        let url = format!("{}/api/certification/{}", self.base_url, item_id);
        match self.request(&url).await {
            Ok(Some(certification)) => {
                metrics::record_provider_lookup(SOURCE, "fetched");
                self.local.insert(item_id, certification.clone());
                self.tier
                    .spawn_set_json(key, certification.clone(), self.shared_ttl);
                Some(certification)
            }
            Ok(None) => {
                metrics::record_provider_lookup(SOURCE, "miss");
                self.negative.insert(item_id, ());
                None
            }
            Err(e) => {
                metrics::record_provider_lookup(SOURCE, "error");
                tracing::debug!(item_id = %item_id, error = %e, "certification lookup failed");
                None
            }
        }
    }

    async fn request(&self, url: &str) -> Result<Option<String>, reqwest::Error> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;

        let body: CertificationBody = response.json().await?;
        Ok(body.certification.filter(|c| !c.is_empty()))
    }
}
