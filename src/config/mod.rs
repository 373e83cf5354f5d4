//! Process configuration.
//!
//! The proxy is configured entirely from environment variables (it runs
//! as a twelve-factor container next to the addon clients it wraps).
//! Each section materializes into a serde-derive struct with defaults
//! and a `validate()` pass; `ProxyConfig::from_env` assembles the whole
//! tree.
//!
//! The per-request configuration embedded in the URL path is a separate
//! concern and lives in [`user`].

mod cache;
mod enrichment;
mod limits;
mod server;
mod user;

pub use cache::*;
pub use enrichment::*;
pub use limits::*;
use serde::{Deserialize, Serialize};
pub use server::*;
use thiserror::Error;
pub use user::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid environment value for {name}: {message}")]
    Env { name: String, message: String },

    #[error("validation error: {0}")]
    Validation(String),
}

/// Root configuration assembled from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub limits: RateLimitSettings,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            server: ServerConfig::from_env()?,
            cache: CacheSettings::from_env()?,
            limits: RateLimitSettings::from_env()?,
            enrichment: EnrichmentConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.cache.validate()?;
        self.limits.validate()?;
        self.enrichment.validate()?;
        Ok(())
    }
}

/// Read an environment variable, parsing it into `T` with a typed error.
pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Env {
            name: name.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Read an optional environment variable, treating empty as unset.
pub(crate) fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Read a boolean flag; accepts 1/true/yes (case-insensitive).
pub(crate) fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn from_env_applies_defaults() {
        temp_env::with_vars_unset(
            ["PORT", "REDIS_URL", "CACHE_VERSION", "RATE_LIMIT_ANON_BURST"],
            || {
                let config = ProxyConfig::from_env().unwrap();
                assert_eq!(config.server.port, 7000);
                assert!(config.cache.url.is_none());
                assert_eq!(config.cache.version, "1");
                assert!(config.cache.raw_cache_enabled);
                assert!(config.limits.enabled);
            },
        );
    }

    #[test]
    #[serial]
    fn from_env_reads_overrides() {
        temp_env::with_vars(
            [
                ("PORT", Some("8123")),
                ("REDIS_URL", Some("redis://cache:6379")),
                ("CACHE_VERSION", Some("7")),
                ("DISABLE_RAW_CACHE", Some("1")),
                ("RATE_LIMIT_ANON_RPS", Some("11")),
                ("RATE_LIMIT_ANON_BURST", Some("33")),
                ("UPSTREAM_TIMEOUT_SECS", Some("9")),
            ],
            || {
                let config = ProxyConfig::from_env().unwrap();
                assert_eq!(config.server.port, 8123);
                assert_eq!(config.cache.url.as_deref(), Some("redis://cache:6379"));
                assert_eq!(config.cache.version, "7");
                assert!(!config.cache.raw_cache_enabled);
                assert_eq!(config.limits.anonymous.rps, 11);
                assert_eq!(config.limits.anonymous.burst, 33);
                assert_eq!(config.enrichment.upstream_timeout_secs, 9);
            },
        );
    }

    #[test]
    #[serial]
    fn unparseable_env_value_is_an_error() {
        temp_env::with_vars([("PORT", Some("not-a-port"))], || {
            let err = ProxyConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Env { ref name, .. } if name == "PORT"));
        });
    }

    #[test]
    #[serial]
    fn burst_below_rps_fails_validation() {
        temp_env::with_vars(
            [
                ("RATE_LIMIT_ANON_RPS", Some("50")),
                ("RATE_LIMIT_ANON_BURST", Some("10")),
            ],
            || {
                let err = ProxyConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Validation(_)));
            },
        );
    }
}
