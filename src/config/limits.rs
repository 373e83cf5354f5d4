use serde::{Deserialize, Serialize};

use super::{ConfigError, env_flag, env_parse};

/// Rate limiting defaults: sliding one-second windows per identity, with
/// a burst allowance above the sustained rate. Search routes are limited
/// more strictly because they fan out to uncached upstream queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_anonymous")]
    pub anonymous: TierLimit,

    #[serde(default = "default_authenticated")]
    pub authenticated: TierLimit,

    #[serde(default = "default_anonymous_search")]
    pub anonymous_search: TierLimit,

    #[serde(default = "default_authenticated_search")]
    pub authenticated_search: TierLimit,
}

/// Limit parameters for one identity class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierLimit {
    /// Sustained requests per second.
    pub rps: u32,
    /// Maximum requests admitted inside a single window.
    pub burst: u32,
}

impl RateLimitSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_flag("RATE_LIMIT_ENABLED", true),
            anonymous: TierLimit {
                rps: env_parse("RATE_LIMIT_ANON_RPS", defaults.anonymous.rps)?,
                burst: env_parse("RATE_LIMIT_ANON_BURST", defaults.anonymous.burst)?,
            },
            authenticated: TierLimit {
                rps: env_parse("RATE_LIMIT_AUTH_RPS", defaults.authenticated.rps)?,
                burst: env_parse("RATE_LIMIT_AUTH_BURST", defaults.authenticated.burst)?,
            },
            anonymous_search: TierLimit {
                rps: env_parse("RATE_LIMIT_SEARCH_RPS", defaults.anonymous_search.rps)?,
                burst: env_parse("RATE_LIMIT_SEARCH_BURST", defaults.anonymous_search.burst)?,
            },
            authenticated_search: TierLimit {
                rps: env_parse("RATE_LIMIT_AUTH_SEARCH_RPS", defaults.authenticated_search.rps)?,
                burst: env_parse(
                    "RATE_LIMIT_AUTH_SEARCH_BURST",
                    defaults.authenticated_search.burst,
                )?,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, tier) in [
            ("anonymous", self.anonymous),
            ("authenticated", self.authenticated),
            ("anonymous_search", self.anonymous_search),
            ("authenticated_search", self.authenticated_search),
        ] {
            if tier.burst == 0 {
                return Err(ConfigError::Validation(format!(
                    "rate limit burst for {name} must be greater than 0"
                )));
            }
            if tier.burst < tier.rps {
                return Err(ConfigError::Validation(format!(
                    "rate limit burst for {name} must be at least the sustained rps"
                )));
            }
        }
        Ok(())
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            anonymous: default_anonymous(),
            authenticated: default_authenticated(),
            anonymous_search: default_anonymous_search(),
            authenticated_search: default_authenticated_search(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_anonymous() -> TierLimit {
    TierLimit { rps: 10, burst: 20 }
}

fn default_authenticated() -> TierLimit {
    TierLimit { rps: 20, burst: 40 }
}

fn default_anonymous_search() -> TierLimit {
    TierLimit { rps: 3, burst: 6 }
}

fn default_authenticated_search() -> TierLimit {
    TierLimit { rps: 6, burst: 12 }
}
