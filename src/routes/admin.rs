//! Administrative endpoints: hot-key report, cache statistics, cache
//! flush (version bump), and the forward to the ratings service's
//! rebuild trigger.
//!
//! When `ADMIN_SECRET` is configured, every route here requires it as a
//! Bearer token or HTTP basic password, compared in constant time.

use axum::{
    Json,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::{
    AppState,
    cache::{DEFAULT_LIMIT, DEFAULT_WINDOW_MINUTES},
};

/// Gate middleware for the admin surface.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(secret) = &state.config.server.admin_secret else {
        // No secret configured: the surface is open (loopback setups).
        return Ok(next.run(req).await);
    };

    let authorized = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|header| credentials_match(header, secret));

    if authorized {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn credentials_match(header: &str, secret: &str) -> bool {
    if let Some(token) = header.strip_prefix("Bearer ") {
        return bool::from(token.as_bytes().ct_eq(secret.as_bytes()));
    }
    if let Some(encoded) = header.strip_prefix("Basic ")
        && let Ok(decoded) = STANDARD.decode(encoded)
        && let Ok(pair) = String::from_utf8(decoded)
        && let Some((_, password)) = pair.split_once(':')
    {
        return bool::from(password.as_bytes().ct_eq(secret.as_bytes()));
    }
    false
}

#[derive(Debug, Deserialize)]
pub struct HotKeysQuery {
    window: Option<u32>,
    limit: Option<usize>,
}

/// `GET /api/admin/hotkeys?window=&limit=`
pub async fn hot_keys(
    State(state): State<AppState>,
    Query(query): Query<HotKeysQuery>,
) -> impl IntoResponse {
    let window = query.window.unwrap_or(DEFAULT_WINDOW_MINUTES);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let keys = state.hot_keys.get_hot(window, limit).await;

    Json(json!({
        "window_minutes": window,
        "limit": limit,
        "keys": keys,
    }))
}

/// `GET /api/admin/cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.cache.stats_snapshot();
    Json(json!({
        "version": state.cache_version.current(),
        "stats": stats,
        "pending_flights": state.single_flight.pending_count(),
    }))
}

/// `POST /api/admin/cache/flush` — bump the in-process cache version,
/// invalidating every existing entry without touching the store.
pub async fn cache_flush(State(state): State<AppState>) -> impl IntoResponse {
    let version = state.cache_version.bump();
    tracing::info!(version = %version, "cache flushed via version bump");
    Json(json!({"flushed": true, "version": version}))
}

/// `POST /api/admin/ratings/rebuild` — forward the trigger to the
/// companion ratings service and relay its answer.
pub async fn ratings_rebuild(State(state): State<AppState>) -> Response {
    let url = format!("{}/api/rebuild", state.providers.ratings.base_url());

    match state.http_client.post(&url).send().await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let body = upstream
                .json::<serde_json::Value>()
                .await
                .unwrap_or_else(|_| json!({"forwarded": true}));
            (status, Json(body)).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "ratings rebuild forward failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "ratings service unreachable"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_and_basic_credentials() {
        assert!(credentials_match("Bearer s3cret", "s3cret"));
        assert!(!credentials_match("Bearer wrong", "s3cret"));

        let basic = format!("Basic {}", STANDARD.encode("admin:s3cret"));
        assert!(credentials_match(&basic, "s3cret"));

        let wrong = format!("Basic {}", STANDARD.encode("admin:nope"));
        assert!(!credentials_match(&wrong, "s3cret"));

        assert!(!credentials_match("Digest abc", "s3cret"));
    }
}
