//! Client identity for rate limiting.
//!
//! Authenticated installations (a `userId` in the decoded config) are
//! limited per user; everything else is limited per normalized client IP
//! taken from forwarded headers, falling back to the socket address.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

use crate::config::{RateLimitSettings, TierLimit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    Authenticated(String),
    Anonymous(String),
}

impl ClientIdentity {
    /// Stable key segment for the window sorted set.
    pub fn key(&self) -> String {
        match self {
            ClientIdentity::Authenticated(user_id) => format!("authenticated:{user_id}"),
            ClientIdentity::Anonymous(ip) => format!("anonymous:{ip}"),
        }
    }

    pub fn from_request(
        user_id: Option<&str>,
        headers: &HeaderMap,
        socket: Option<SocketAddr>,
    ) -> Self {
        if let Some(user_id) = user_id {
            return ClientIdentity::Authenticated(user_id.to_string());
        }
        ClientIdentity::Anonymous(client_ip(headers, socket))
    }
}

/// Limit tier: identity class × route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    Anonymous,
    Authenticated,
    AnonymousSearch,
    AuthenticatedSearch,
}

impl RateTier {
    pub fn select(identity: &ClientIdentity, is_search: bool) -> Self {
        match (identity, is_search) {
            (ClientIdentity::Authenticated(_), false) => RateTier::Authenticated,
            (ClientIdentity::Authenticated(_), true) => RateTier::AuthenticatedSearch,
            (ClientIdentity::Anonymous(_), false) => RateTier::Anonymous,
            (ClientIdentity::Anonymous(_), true) => RateTier::AnonymousSearch,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RateTier::Anonymous => "anonymous",
            RateTier::Authenticated => "authenticated",
            RateTier::AnonymousSearch => "anonymous-search",
            RateTier::AuthenticatedSearch => "authenticated-search",
        }
    }

    pub fn limits(self, settings: &RateLimitSettings) -> TierLimit {
        match self {
            RateTier::Anonymous => settings.anonymous,
            RateTier::Authenticated => settings.authenticated,
            RateTier::AnonymousSearch => settings.anonymous_search,
            RateTier::AuthenticatedSearch => settings.authenticated_search,
        }
    }
}

/// A catalog route is a search when the catalog id or the extra
/// parameters carry a search term.
pub fn is_search_route(catalog_id: &str, has_search_param: bool) -> bool {
    has_search_param || catalog_id.to_ascii_lowercase().contains("search")
}

/// Client IP in header-precedence order: X-Forwarded-For (first entry),
/// X-Real-IP, CF-Connecting-IP, then the socket address.
fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> String {
    if let Some(value) = headers.get("X-Forwarded-For")
        && let Ok(raw) = value.to_str()
        && let Some(first) = raw.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return normalize_ip(first);
        }
    }

    for header in ["X-Real-IP", "CF-Connecting-IP"] {
        if let Some(value) = headers.get(header)
            && let Ok(raw) = value.to_str()
        {
            let raw = raw.trim();
            if !raw.is_empty() {
                return normalize_ip(raw);
            }
        }
    }

    match socket {
        Some(addr) => normalize_ip(&addr.ip().to_string()),
        None => "unknown".to_string(),
    }
}

/// IPv6-mapped IPv4 collapses to the plain IPv4 form; loopback collapses
/// to a single bucket so local traffic shares one window.
fn normalize_ip(raw: &str) -> String {
    let parsed: IpAddr = match raw.parse() {
        Ok(ip) => ip,
        Err(_) => return raw.to_string(),
    };

    let canonical = match parsed {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };

    if canonical.is_loopback() {
        return "localhost".to_string();
    }

    canonical.to_string()
}
