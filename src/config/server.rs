use serde::{Deserialize, Serialize};

use super::{ConfigError, env_opt, env_parse};

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret protecting the admin endpoints. When unset the
    /// admin surface is left open, which is only acceptable on a
    /// loopback deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<String>,

    /// User-Agent sent on every outbound request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_opt("HOST").unwrap_or_else(default_host),
            port: env_parse("PORT", default_port())?,
            admin_secret: env_opt("ADMIN_SECRET"),
            user_agent: env_opt("USER_AGENT").unwrap_or_else(default_user_agent),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Validation("server host must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_secret: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7000
}

fn default_user_agent() -> String {
    format!("garnish/{}", env!("CARGO_PKG_VERSION"))
}
