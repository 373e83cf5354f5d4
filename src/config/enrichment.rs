use serde::{Deserialize, Serialize};

use super::{ConfigError, env_opt, env_parse};

/// Enrichment fan-out settings: provider endpoints, timeouts, and the
/// intra-request concurrency bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Base URL of the companion ratings service (title and episode
    /// ratings). Also the target of the admin rebuild trigger.
    #[serde(default = "default_ratings_service_url")]
    pub ratings_service_url: String,

    /// Base URL of the aggregated-metadata API (certification, critic
    /// scores, release dates, streaming availability).
    #[serde(default = "default_metadata_api_url")]
    pub metadata_api_url: String,

    /// Base URL of the anime-list ratings API.
    #[serde(default = "default_anilist_api_url")]
    pub anilist_api_url: String,

    /// Per-provider request timeout.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Upstream addon request timeout.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Total upstream attempts (including the first).
    #[serde(default = "default_upstream_retries")]
    pub upstream_retries: u32,

    /// Items consolidated in parallel within one batch wave.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl EnrichmentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            ratings_service_url: env_opt("RATINGS_SERVICE_URL")
                .unwrap_or_else(default_ratings_service_url),
            metadata_api_url: env_opt("METADATA_API_URL").unwrap_or_else(default_metadata_api_url),
            anilist_api_url: env_opt("ANILIST_API_URL").unwrap_or_else(default_anilist_api_url),
            provider_timeout_secs: env_parse("PROVIDER_TIMEOUT_SECS", default_provider_timeout())?,
            upstream_timeout_secs: env_parse("UPSTREAM_TIMEOUT_SECS", default_upstream_timeout())?,
            upstream_retries: env_parse("UPSTREAM_RETRIES", default_upstream_retries())?,
            concurrency: env_parse("ENRICH_CONCURRENCY", default_concurrency())?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(
                "enrichment concurrency must be greater than 0".into(),
            ));
        }
        if self.upstream_retries == 0 {
            return Err(ConfigError::Validation(
                "upstream retries must be at least 1 (the first attempt)".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            ratings_service_url: default_ratings_service_url(),
            metadata_api_url: default_metadata_api_url(),
            anilist_api_url: default_anilist_api_url(),
            provider_timeout_secs: default_provider_timeout(),
            upstream_timeout_secs: default_upstream_timeout(),
            upstream_retries: default_upstream_retries(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_ratings_service_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_metadata_api_url() -> String {
    "https://api.mdblist.com".to_string()
}

fn default_anilist_api_url() -> String {
    "https://graphql.anilist.co".to_string()
}

fn default_provider_timeout() -> u64 {
    8
}

fn default_upstream_timeout() -> u64 {
    20
}

fn default_upstream_retries() -> u32 {
    3
}

fn default_concurrency() -> usize {
    10
}
