use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::CacheTtlConfig;

/// Global cache version. Every entry key carries a `v{V}` prefix, so
/// bumping the version invalidates all prior entries without touching the
/// store. The base comes from configuration; the admin cache-flush
/// endpoint bumps an in-process counter appended to it.
pub struct CacheVersion {
    base: String,
    bump: AtomicU32,
}

impl CacheVersion {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            bump: AtomicU32::new(0),
        }
    }

    pub fn current(&self) -> String {
        match self.bump.load(Ordering::Relaxed) {
            0 => self.base.clone(),
            n => format!("{}.{}", self.base, n),
        }
    }

    /// Invalidate every existing entry by moving to a fresh version.
    pub fn bump(&self) -> String {
        self.bump.fetch_add(1, Ordering::Relaxed);
        self.current()
    }
}

/// Extra catalog parameters carried into the key. Trailing empty segments
/// are dropped, so `top` and `top::::` produce the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogExtra {
    pub page: Option<String>,
    pub search: Option<String>,
    pub genre: Option<String>,
}

impl CatalogExtra {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut extra = Self::default();
        for (k, v) in pairs {
            match k {
                "page" | "skip" => extra.page = Some(v.to_string()),
                "search" => extra.search = Some(v.to_string()),
                "genre" => extra.genre = Some(v.to_string()),
                _ => {}
            }
        }
        extra
    }

    pub fn is_search(&self) -> bool {
        self.search.as_deref().is_some_and(|s| !s.is_empty())
    }
}

pub struct CacheKeys;

impl CacheKeys {
    /// Formatted catalog response:
    /// `v{V}:catalog:{configHash}:{type}:{id}[:{page}[:{search}[:{genre}[:{userId}]]]]`
    pub fn catalog(
        version: &str,
        config_hash: &str,
        media_type: &str,
        catalog_id: &str,
        extra: &CatalogExtra,
        user_id: Option<&str>,
    ) -> String {
        let mut segments = vec![
            format!("v{version}"),
            "catalog".to_string(),
            config_hash.to_string(),
            media_type.to_string(),
            catalog_id.to_string(),
            extra.page.clone().unwrap_or_default(),
            extra.search.clone().unwrap_or_default(),
            extra.genre.clone().unwrap_or_default(),
            user_id.unwrap_or_default().to_string(),
        ];
        Self::drop_trailing_empties(&mut segments);
        segments.join(":")
    }

    /// Formatted meta response: `v{V}:meta:{configHash}:{type}:{id}`
    pub fn meta(version: &str, config_hash: &str, media_type: &str, id: &str) -> String {
        format!("v{version}:meta:{config_hash}:{media_type}:{id}")
    }

    /// Formatted manifest: `v{V}:manifest:{configHash}`
    pub fn manifest(version: &str, config_hash: &str) -> String {
        format!("v{version}:manifest:{config_hash}")
    }

    /// Raw (format-agnostic) catalog, shared across configs of the same
    /// upstream: `v{V}:raw:catalog:{urlHash}:{type}:{id}[...]`
    pub fn raw_catalog(
        version: &str,
        url_hash: &str,
        media_type: &str,
        catalog_id: &str,
        extra: &CatalogExtra,
    ) -> String {
        let mut segments = vec![
            format!("v{version}"),
            "raw".to_string(),
            "catalog".to_string(),
            url_hash.to_string(),
            media_type.to_string(),
            catalog_id.to_string(),
            extra.page.clone().unwrap_or_default(),
            extra.search.clone().unwrap_or_default(),
            extra.genre.clone().unwrap_or_default(),
        ];
        Self::drop_trailing_empties(&mut segments);
        segments.join(":")
    }

    /// Raw meta document: `v{V}:raw:meta:{urlHash}:{type}:{id}`
    pub fn raw_meta(version: &str, url_hash: &str, media_type: &str, id: &str) -> String {
        format!("v{version}:raw:meta:{url_hash}:{media_type}:{id}")
    }

    /// Per-source auxiliary data: `v{V}:data:{source}:{itemId}[:{region}]`
    pub fn source_data(version: &str, source: &str, item_id: &str, region: Option<&str>) -> String {
        match region {
            Some(region) if !region.is_empty() => {
                format!("v{version}:data:{source}:{item_id}:{region}")
            }
            _ => format!("v{version}:data:{source}:{item_id}"),
        }
    }

    /// Per-source rating: `v{V}:rating:{source}:{itemId}`
    pub fn source_rating(version: &str, source: &str, item_id: &str) -> String {
        format!("v{version}:rating:{source}:{item_id}")
    }

    /// Consolidated rating: `v{V}:rating:consolidated:{itemId}`
    pub fn consolidated_rating(version: &str, item_id: &str) -> String {
        format!("v{version}:rating:consolidated:{item_id}")
    }

    /// Rate-limit window (sorted set): `ratelimit:v{V}:{tier}:{identity}`
    pub fn rate_limit(version: &str, tier: &str, identity: &str) -> String {
        format!("ratelimit:v{version}:{tier}:{identity}")
    }

    /// Hot-key counter bucket (sorted set): `hotkeys:{minuteBucket}`
    pub fn hot_keys_bucket(minute_bucket: i64) -> String {
        format!("hotkeys:{minute_bucket}")
    }

    fn drop_trailing_empties(segments: &mut Vec<String>) {
        while segments.last().is_some_and(|s| s.is_empty()) {
            segments.pop();
        }
    }
}

/// First 16 hex chars of SHA-256 over the canonicalized (recursively
/// key-sorted) config JSON. Two structurally equal configs hash
/// identically regardless of key order.
pub fn config_hash(config: &Value) -> String {
    let canonical = canonical_json(config);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// First 12 hex chars of SHA-256 over the upstream base URL.
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Serialize a JSON value with object keys recursively sorted and array
/// order preserved. Written explicitly rather than relying on map
/// ordering inside serde_json, so the hash is stable against feature
/// unification (`preserve_order`).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json handles string escaping for the key.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&serde_json::to_string(leaf).unwrap_or_default()),
    }
}

/// TTL selection for catalog entries. The catalog id drives freshness:
/// searches churn fast, popularity lists barely move, and user-specific
/// addons (watchlists and the like) must not go stale.
pub fn catalog_ttl(ttl: &CacheTtlConfig, catalog_id: &str, is_user_specific: bool) -> Duration {
    if is_user_specific {
        return Duration::from_secs(ttl.user_specific_secs);
    }

    let id = catalog_id.to_ascii_lowercase();
    if id.contains("search") {
        return Duration::from_secs(ttl.search_secs);
    }
    if id.contains("popular") || id.contains("trending") || id.starts_with("top") {
        return Duration::from_secs(ttl.popular_secs);
    }

    Duration::from_secs(ttl.default_secs)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ttl_defaults() -> CacheTtlConfig {
        CacheTtlConfig::default()
    }

    #[test]
    fn config_hash_ignores_key_order() {
        let a = json!({"upstream": "https://u/manifest.json", "format": {"position": "prefix", "template": "{rating}"}});
        let b = json!({"format": {"template": "{rating}", "position": "prefix"}, "upstream": "https://u/manifest.json"});
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn config_hash_is_sensitive_to_values() {
        let a = json!({"upstream": "https://u/manifest.json"});
        let b = json!({"upstream": "https://v/manifest.json"});
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn config_hash_preserves_array_order() {
        let a = json!({"order": ["rating", "votes"]});
        let b = json!({"order": ["votes", "rating"]});
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn hash_lengths() {
        assert_eq!(config_hash(&json!({})).len(), 16);
        assert_eq!(url_hash("https://u/manifest.json").len(), 12);
    }

    #[test]
    fn catalog_key_drops_trailing_empties() {
        let key = CacheKeys::catalog("1", "abc", "movie", "top", &CatalogExtra::default(), None);
        assert_eq!(key, "v1:catalog:abc:movie:top");
    }

    #[test]
    fn catalog_key_keeps_inner_empties() {
        let extra = CatalogExtra {
            page: None,
            search: None,
            genre: Some("action".to_string()),
        };
        let key = CacheKeys::catalog("1", "abc", "movie", "top", &extra, None);
        assert_eq!(key, "v1:catalog:abc:movie:top:::action");
    }

    #[test]
    fn raw_keys_never_contain_config_hash() {
        let raw = CacheKeys::raw_catalog("1", "deadbeef0123", "movie", "top", &CatalogExtra::default());
        assert_eq!(raw, "v1:raw:catalog:deadbeef0123:movie:top");
        // Different second segment from the formatted key space.
        let formatted = CacheKeys::catalog("1", "cfg0hash", "movie", "top", &CatalogExtra::default(), None);
        assert_ne!(
            raw.split(':').nth(1),
            formatted.split(':').nth(1),
        );
    }

    #[test]
    fn version_bump_changes_every_key() {
        let version = CacheVersion::new("3");
        let before = CacheKeys::manifest(&version.current(), "abc");
        version.bump();
        let after = CacheKeys::manifest(&version.current(), "abc");
        assert_ne!(before, after);
        assert_eq!(after, "v3.1:manifest:abc");
    }

    #[test]
    fn catalog_ttl_selection() {
        let ttl = ttl_defaults();
        assert_eq!(
            catalog_ttl(&ttl, "search-movies", false),
            Duration::from_secs(ttl.search_secs)
        );
        assert_eq!(
            catalog_ttl(&ttl, "top", false),
            Duration::from_secs(ttl.popular_secs)
        );
        assert_eq!(
            catalog_ttl(&ttl, "trending-now", false),
            Duration::from_secs(ttl.popular_secs)
        );
        assert_eq!(
            catalog_ttl(&ttl, "anything", true),
            Duration::from_secs(ttl.user_specific_secs)
        );
        assert_eq!(
            catalog_ttl(&ttl, "editors-picks", false),
            Duration::from_secs(ttl.default_secs)
        );
    }

    #[test]
    fn rate_limit_key_shape() {
        assert_eq!(
            CacheKeys::rate_limit("1", "anonymous", "anonymous:10.0.0.1"),
            "ratelimit:v1:anonymous:anonymous:10.0.0.1"
        );
    }

    #[test]
    fn source_data_key_with_region() {
        assert_eq!(
            CacheKeys::source_data("1", "metadata", "tt123", Some("us")),
            "v1:data:metadata:tt123:us"
        );
        assert_eq!(
            CacheKeys::source_data("1", "metadata", "tt123", None),
            "v1:data:metadata:tt123"
        );
    }
}
