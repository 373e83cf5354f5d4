//! End-to-end pipeline scenarios against wiremock upstreams and the
//! in-memory cache backend.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, path_regex},
};

use crate::{
    AppState,
    cache::MemoryCache,
    config::{ProxyConfig, TierLimit},
    routes,
};

struct Harness {
    app: Router,
    state: AppState,
    upstream: MockServer,
    providers: MockServer,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(customize: impl FnOnce(&mut ProxyConfig)) -> Self {
        let upstream = MockServer::start().await;
        let providers = MockServer::start().await;

        let mut config = ProxyConfig::default();
        config.enrichment.ratings_service_url = providers.uri();
        config.enrichment.metadata_api_url = providers.uri();
        config.enrichment.anilist_api_url = providers.uri();
        config.enrichment.upstream_retries = 1;
        customize(&mut config);

        let state = AppState::with_store(config, Some(Arc::new(MemoryCache::default())));
        let app = routes::build_router(state.clone());

        Self {
            app,
            state,
            upstream,
            providers,
        }
    }

    fn blob(&self, mut config: Value) -> String {
        let obj = config.as_object_mut().expect("config object");
        obj.entry("upstream")
            .or_insert(json!(format!("{}/manifest.json", self.upstream.uri())));
        URL_SAFE_NO_PAD.encode(config.to_string())
    }

    async fn get(&self, uri: &str) -> (StatusCode, http::HeaderMap, Vec<u8>) {
        self.get_with_ip(uri, "203.0.113.7").await
    }

    async fn get_with_ip(&self, uri: &str, ip: &str) -> (StatusCode, http::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, headers, body)
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, String, Value) {
        let (status, headers, body) = self.get(uri).await;
        let x_cache = headers
            .get("X-Cache")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, x_cache, json)
    }

    /// Write-backs are spawned; give them a moment to land.
    async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    }
}

async fn mount_catalog(upstream: &MockServer, body: Value, expect: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/catalog/movie/top.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body));
    match expect {
        Some(n) => mock.expect(n).mount(upstream).await,
        None => mock.mount(upstream).await,
    }
}

async fn mount_rating(providers: &MockServer, id: &str, rating: Option<f64>) {
    let response = match rating {
        Some(r) => ResponseTemplate::new(200).set_body_json(json!({"rating": r})),
        None => ResponseTemplate::new(404),
    };
    Mock::given(method("GET"))
        .and(path(format!("/api/ratings/{id}")))
        .respond_with(response)
        .mount(providers)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/title/{id}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(providers)
        .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios 1–3: cold catalog, warm catalog, warm raw with another format
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cold_then_warm_then_other_format_reuses_raw() {
    let harness = Harness::new().await;
    mount_catalog(
        &harness.upstream,
        json!({"metas": [{"id": "tt1", "name": "A"}, {"id": "tt2", "name": "B"}]}),
        Some(1),
    )
    .await;
    mount_rating(&harness.providers, "tt1", Some(8.5)).await;
    mount_rating(&harness.providers, "tt2", None).await;

    let blob = harness.blob(json!({
        "titleFormat": {"position": "prefix", "template": "★ {rating}", "separator": " | "}
    }));

    // Scenario 1: cold.
    let (status, x_cache, body) = harness
        .get_json(&format!("/{blob}/catalog/movie/top.json"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache, "miss");
    assert_eq!(
        body,
        json!({"metas": [{"id": "tt1", "name": "★ 8.5 | A"}, {"id": "tt2", "name": "B"}]})
    );

    harness.settle().await;

    // Scenario 2: warm, same config — identical body, no upstream call.
    let (status, x_cache, warm_body) = harness
        .get_json(&format!("/{blob}/catalog/movie/top.json"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache, "hit");
    assert_eq!(warm_body, body);

    // Scenario 3: different format, same upstream — raw key hit, so the
    // upstream mock's expect(1) still holds.
    let other = harness.blob(json!({
        "format": {"position": "suffix", "template": "[{rating}]", "separator": " "}
    }));
    let (status, _, body) = harness
        .get_json(&format!("/{other}/catalog/movie/top.json"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"metas": [{"id": "tt1", "name": "A [8.5]"}, {"id": "tt2", "name": "B"}]})
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 4: single-flight
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fifty_concurrent_misses_fetch_upstream_once() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/catalog/movie/top.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"metas": [{"id": "tt1", "name": "A"}]}))
                .set_delay(std::time::Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&harness.upstream)
        .await;
    mount_rating(&harness.providers, "tt1", Some(8.5)).await;

    let blob = harness.blob(json!({}));
    let uri = format!("/{blob}/catalog/movie/top.json");

    let requests = (0..50).map(|_| harness.get(&uri));
    let responses = futures::future::join_all(requests).await;

    let first_body = responses[0].2.clone();
    for (status, _, body) in &responses {
        assert_eq!(*status, StatusCode::OK);
        assert_eq!(body, &first_body, "all coalesced responses are bytewise equal");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 5: rate limiting on the miss path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn burst_of_cold_misses_is_limited_then_recovers() {
    let harness = Harness::with_config(|config| {
        config.limits.anonymous = TierLimit { rps: 5, burst: 10 };
    })
    .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/catalog/movie/cat-\d+\.json$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metas": []})))
        .mount(&harness.upstream)
        .await;

    let blob = harness.blob(json!({}));

    // 15 cold catalogs back-to-back from one IP: burst admits 10.
    let mut statuses = Vec::new();
    let mut last_rejection = None;
    for i in 0..15 {
        let uri = format!("/{blob}/catalog/movie/cat-{i}.json");
        let (status, headers, _) = harness.get_with_ip(&uri, "198.51.100.9").await;
        if status == StatusCode::TOO_MANY_REQUESTS {
            last_rejection = Some(headers);
        }
        statuses.push(status);
    }

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let limited = statuses
        .iter()
        .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!(ok, 10);
    assert_eq!(limited, 5);

    let headers = last_rejection.expect("at least one 429");
    let retry_after: u64 = headers
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("Retry-After header");
    assert!((1..=2).contains(&retry_after));
    assert_eq!(
        headers.get("X-RateLimit-Limit").unwrap().to_str().unwrap(),
        "10"
    );
    assert_eq!(
        headers
            .get("X-RateLimit-Remaining")
            .unwrap()
            .to_str()
            .unwrap(),
        "0"
    );

    // After the window slides, the identity is admitted again.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    for i in 100..110 {
        let uri = format!("/{blob}/catalog/movie/cat-{i}.json");
        let (status, _, _) = harness.get_with_ip(&uri, "198.51.100.9").await;
        assert_eq!(status, StatusCode::OK);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 6: cache outage fails open
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn disabled_tier_bypasses_and_admits_everything() {
    let harness = Harness::with_config(|config| {
        config.limits.anonymous = TierLimit { rps: 2, burst: 4 };
    })
    .await;
    mount_catalog(&harness.upstream, json!({"metas": []}), None).await;

    let blob = harness.blob(json!({}));
    let uri = format!("/{blob}/catalog/movie/top.json");

    // Healthy tier first.
    let (status, x_cache, _) = harness.get_json(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache, "miss");

    // Outage: disable mid-run. Responses continue, every one marked
    // bypass, and the limiter fails open well past the burst of 4.
    harness.state.cache.set_enabled(false);
    for _ in 0..12 {
        let (status, x_cache, _) = harness.get_json(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache, "bypass");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallbacks and error surfaces
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upstream_failure_degrades_to_empty_catalog() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/catalog/movie/top.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.upstream)
        .await;

    let blob = harness.blob(json!({}));
    let (status, x_cache, body) = harness
        .get_json(&format!("/{blob}/catalog/movie/top.json"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache, "miss");
    assert_eq!(body, json!({"metas": []}));
}

#[tokio::test]
async fn upstream_failure_degrades_to_null_meta() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/meta/movie/tt1.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.upstream)
        .await;

    let blob = harness.blob(json!({}));
    let (status, _, body) = harness
        .get_json(&format!("/{blob}/meta/movie/tt1.json"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"meta": null}));
}

#[tokio::test]
async fn manifest_upstream_failure_is_a_400() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/manifest.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&harness.upstream)
        .await;

    let blob = harness.blob(json!({}));
    let (status, _, body) = harness.get_json(&format!("/{blob}/manifest.json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn invalid_config_blob_is_a_400() {
    let harness = Harness::new().await;
    let (status, _, body) = harness
        .get_json("/%21%21%21/catalog/movie/top.json")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("config"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Manifest rewriting
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn manifest_is_rewritten_and_cached() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/manifest.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "org.example.addon",
            "name": "Example",
            "version": "1.2.3"
        })))
        .expect(1)
        .mount(&harness.upstream)
        .await;

    let blob = harness.blob(json!({"displayName": "Example, garnished"}));
    let (status, x_cache, body) = harness.get_json(&format!("/{blob}/manifest.json")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(x_cache, "miss");
    assert!(body["id"].as_str().unwrap().contains("garnish"));
    assert_eq!(body["name"], "Example, garnished");

    harness.settle().await;
    let (_, x_cache, cached) = harness.get_json(&format!("/{blob}/manifest.json")).await;
    assert_eq!(x_cache, "hit");
    assert_eq!(cached, body);
}

// ─────────────────────────────────────────────────────────────────────────────
// Admin surface
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_requires_the_shared_secret() {
    let harness = Harness::with_config(|config| {
        config.server.admin_secret = Some("s3cret".to_string());
    })
    .await;

    let request = Request::builder()
        .uri("/api/admin/cache/stats")
        .body(Body::empty())
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/admin/cache/stats")
        .header("Authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let stats: Value = serde_json::from_slice(&body).unwrap();
    assert!(stats["stats"]["enabled"].as_bool().unwrap());
}

#[tokio::test]
async fn cache_flush_invalidates_formatted_entries() {
    let harness = Harness::new().await;
    mount_catalog(&harness.upstream, json!({"metas": []}), Some(2)).await;

    let blob = harness.blob(json!({}));
    let uri = format!("/{blob}/catalog/movie/top.json");

    let (_, x_cache, _) = harness.get_json(&uri).await;
    assert_eq!(x_cache, "miss");
    harness.settle().await;
    let (_, x_cache, _) = harness.get_json(&uri).await;
    assert_eq!(x_cache, "hit");

    // Flush bumps the version; the very same request misses again and
    // re-fetches upstream (hence expect(2)).
    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/cache/flush")
        .body(Body::empty())
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (_, x_cache, _) = harness.get_json(&uri).await;
    assert_eq!(x_cache, "miss");
}

#[tokio::test]
async fn hot_keys_report_ranks_accessed_keys() {
    let harness = Harness::new().await;
    mount_catalog(&harness.upstream, json!({"metas": []}), None).await;

    let blob = harness.blob(json!({}));
    let uri = format!("/{blob}/catalog/movie/top.json");
    for _ in 0..3 {
        harness.get(&uri).await;
    }
    harness.settle().await;

    let request = Request::builder()
        .uri("/api/admin/hotkeys?window=5&limit=10")
        .body(Body::empty())
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let report: Value = serde_json::from_slice(&body).unwrap();
    let keys = report["keys"].as_array().unwrap();
    assert!(!keys.is_empty());
    assert_eq!(keys[0]["count"], 3);
    assert!(
        keys[0]["key"]
            .as_str()
            .unwrap()
            .contains(":catalog:")
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_reports_checks_and_duration() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&harness.providers)
        .await;

    let (status, _, body) = harness.get("/healthz").await;
    let health: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["checks"]["cache"]["status"], "up");
    assert_eq!(health["checks"]["provider"]["status"], "up");
    assert!(health["duration_ms"].is_number());
}

#[tokio::test]
async fn healthz_is_503_when_the_provider_is_down() {
    let harness = Harness::new().await;
    // No /health mock on the provider server: the probe gets a 404.
    let (status, _, body) = harness.get("/healthz").await;
    let health: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["checks"]["provider"]["status"], "down");
}
