use serde::{Deserialize, Serialize};

use super::{ConfigError, env_flag, env_opt, env_parse};

/// Cache tier settings. The tier as a whole is enabled by the presence
/// of a store URL; without one every read is a miss, every write is a
/// no-op, and responses carry `X-Cache: bypass`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Store connection URL (`redis://...`). Presence enables the tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Prefix applied to every key at the store boundary.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Global cache version; bumping it invalidates all prior entries.
    #[serde(default = "default_version")]
    pub version: String,

    /// Whether raw (format-agnostic) upstream responses are cached in
    /// addition to formatted ones.
    #[serde(default = "default_true")]
    pub raw_cache_enabled: bool,

    #[serde(default)]
    pub ttl: CacheTtlConfig,
}

impl CacheSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_opt("REDIS_URL"),
            key_prefix: env_opt("CACHE_KEY_PREFIX").unwrap_or_else(default_key_prefix),
            version: env_opt("CACHE_VERSION").unwrap_or_else(default_version),
            raw_cache_enabled: !env_flag("DISABLE_RAW_CACHE", false),
            ttl: CacheTtlConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.is_empty() {
            return Err(ConfigError::Validation("cache version must not be empty".into()));
        }
        if self.version.contains(':') {
            return Err(ConfigError::Validation(
                "cache version must not contain ':' (it is a key segment)".into(),
            ));
        }
        Ok(())
    }

    /// Store-level connection parameters for the Redis backend.
    pub fn store_config(&self) -> Option<CacheStoreConfig> {
        self.url.as_ref().map(|url| CacheStoreConfig {
            url: url.clone(),
            key_prefix: self.key_prefix.clone(),
        })
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
            version: default_version(),
            raw_cache_enabled: true,
            ttl: CacheTtlConfig::default(),
        }
    }
}

/// Connection parameters consumed by the Redis store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStoreConfig {
    pub url: String,
    pub key_prefix: String,
}

/// Entry lifetimes, in seconds. Catalog freshness is driven by the
/// catalog id (see `cache::catalog_ttl`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    /// Catalogs whose id contains `search`.
    #[serde(default = "default_search_ttl")]
    pub search_secs: u64,

    /// Popularity lists (`popular`, `trending`, `top*`).
    #[serde(default = "default_popular_ttl")]
    pub popular_secs: u64,

    /// User-specific addons (watchlists); freshest tier.
    #[serde(default = "default_user_ttl")]
    pub user_specific_secs: u64,

    /// Everything else.
    #[serde(default = "default_default_ttl")]
    pub default_secs: u64,

    /// Meta documents.
    #[serde(default = "default_meta_ttl")]
    pub meta_secs: u64,

    /// Manifests.
    #[serde(default = "default_manifest_ttl")]
    pub manifest_secs: u64,

    /// Raw upstream documents.
    #[serde(default = "default_raw_ttl")]
    pub raw_secs: u64,

    /// Per-source provider data.
    #[serde(default = "default_provider_ttl")]
    pub provider_secs: u64,

    /// Consolidated ratings.
    #[serde(default = "default_consolidated_ttl")]
    pub consolidated_secs: u64,
}

impl CacheTtlConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            search_secs: env_parse("CACHE_TTL_SEARCH_SECS", default_search_ttl())?,
            popular_secs: env_parse("CACHE_TTL_POPULAR_SECS", default_popular_ttl())?,
            user_specific_secs: env_parse("CACHE_TTL_USER_SECS", default_user_ttl())?,
            default_secs: env_parse("CACHE_TTL_DEFAULT_SECS", default_default_ttl())?,
            meta_secs: env_parse("CACHE_TTL_META_SECS", default_meta_ttl())?,
            manifest_secs: env_parse("CACHE_TTL_MANIFEST_SECS", default_manifest_ttl())?,
            raw_secs: env_parse("CACHE_TTL_RAW_SECS", default_raw_ttl())?,
            provider_secs: env_parse("CACHE_TTL_PROVIDER_SECS", default_provider_ttl())?,
            consolidated_secs: env_parse("CACHE_TTL_CONSOLIDATED_SECS", default_consolidated_ttl())?,
        })
    }
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            search_secs: default_search_ttl(),
            popular_secs: default_popular_ttl(),
            user_specific_secs: default_user_ttl(),
            default_secs: default_default_ttl(),
            meta_secs: default_meta_ttl(),
            manifest_secs: default_manifest_ttl(),
            raw_secs: default_raw_ttl(),
            provider_secs: default_provider_ttl(),
            consolidated_secs: default_consolidated_ttl(),
        }
    }
}

fn default_key_prefix() -> String {
    "garnish:".to_string()
}

fn default_version() -> String {
    "1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_search_ttl() -> u64 {
    300 // 5 minutes
}

fn default_popular_ttl() -> u64 {
    43_200 // 12 hours
}

fn default_user_ttl() -> u64 {
    120 // 2 minutes
}

fn default_default_ttl() -> u64 {
    3_600 // 1 hour
}

fn default_meta_ttl() -> u64 {
    21_600 // 6 hours
}

fn default_manifest_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_raw_ttl() -> u64 {
    1_800 // 30 minutes
}

fn default_provider_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_consolidated_ttl() -> u64 {
    43_200 // 12 hours
}
