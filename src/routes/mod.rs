mod addon;
mod admin;
mod health;

use std::time::Instant;

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use http::{Method, header};
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

use crate::{AppState, observability::metrics};

/// Assemble the full router: the public data surface (permissive CORS),
/// the secret-gated admin surface (CORS additionally allows
/// `Authorization`), and the health/metrics endpoints.
pub fn build_router(state: AppState) -> Router {
    let data_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    let admin_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let data = Router::new()
        .route("/{config}/manifest.json", get(addon::manifest))
        .route("/{config}/catalog/{type}/{id}", get(addon::catalog))
        .route(
            "/{config}/catalog/{type}/{id}/{extra}",
            get(addon::catalog_with_extra),
        )
        .route("/{config}/meta/{type}/{id}", get(addon::meta))
        .layer(data_cors);

    let admin = Router::new()
        .route("/api/admin/hotkeys", get(admin::hot_keys))
        .route("/api/admin/cache/stats", get(admin::cache_stats))
        .route("/api/admin/cache/flush", post(admin::cache_flush))
        .route("/api/admin/ratings/rebuild", post(admin::ratings_rebuild))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin,
        ))
        .layer(admin_cors);

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .merge(admin)
        .merge(data)
        .layer(middleware::from_fn(track_http))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Record request count and latency per matched route.
async fn track_http(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(req).await;

    metrics::record_http_request(
        &method,
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );

    response
}
