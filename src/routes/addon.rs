//! The three data handlers: manifest, catalog, and meta.
//!
//! All share one sequence: decode the URL config, look up the formatted
//! response key, and on a miss enter single-flight. Inside the compute
//! call: rate-limit check (hits and coalesced waiters ride for free),
//! raw-key lookup, upstream fetch with legacy-shape normalization,
//! enrichment, and an async write-back of both keys. Failures past the
//! cache lookup degrade to shape-preserving fallbacks; only a rate-limit
//! rejection surfaces as an error status.

use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::HeaderMap;
use serde_json::{Value, json};
use url::form_urlencoded;

use crate::{
    AppState,
    cache::{CacheKeys, CatalogExtra, FlightOutcome, catalog_ttl},
    config::{UserConfig, UserConfigError},
    error::ProxyError,
    limiter::{ClientIdentity, RateTier, is_search_route},
    observability::metrics,
};

/// Handler shape, for key building, TTL selection, and fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    Manifest,
    Catalog,
    Meta,
}

impl RouteKind {
    fn as_str(self) -> &'static str {
        match self {
            RouteKind::Manifest => "manifest",
            RouteKind::Catalog => "catalog",
            RouteKind::Meta => "meta",
        }
    }
}

pub async fn manifest(
    State(state): State<AppState>,
    Path(config_blob): Path<String>,
    req: Request,
) -> Response {
    let config = match UserConfig::decode(&config_blob) {
        Ok(config) => config,
        Err(err) => return config_error_response(err),
    };

    let version = state.cache_version.current();
    let key = CacheKeys::manifest(&version, &config.config_hash);
    let ttl = Duration::from_secs(state.config.cache.ttl.manifest_secs);

    let pipeline = Pipeline {
        state: &state,
        config: &config,
        kind: RouteKind::Manifest,
        key,
        ttl,
        is_search: false,
        headers: req.headers().clone(),
        socket: socket_addr(&req),
    };

    pipeline
        .run(|| {
            let state = state.clone();
            let config = config.clone();
            async move {
                let doc = state
                    .fetcher
                    .fetch_json(config.upstream_base_url.as_str())
                    .await?;
                Ok(rewrite_manifest(doc, &config))
            }
        })
        .await
}

pub async fn catalog(
    State(state): State<AppState>,
    Path((config_blob, media_type, id)): Path<(String, String, String)>,
    req: Request,
) -> Response {
    catalog_inner(state, config_blob, media_type, id, None, req).await
}

pub async fn catalog_with_extra(
    State(state): State<AppState>,
    Path((config_blob, media_type, id, extra)): Path<(String, String, String, String)>,
    req: Request,
) -> Response {
    catalog_inner(state, config_blob, media_type, id, Some(extra), req).await
}

async fn catalog_inner(
    state: AppState,
    config_blob: String,
    media_type: String,
    id: String,
    extra_raw: Option<String>,
    req: Request,
) -> Response {
    let config = match UserConfig::decode(&config_blob) {
        Ok(config) => config,
        Err(err) => return config_error_response(err),
    };

    let catalog_id = strip_json_suffix(&id).to_string();
    let extra = parse_extra(extra_raw.as_deref().map(strip_json_suffix));

    let version = state.cache_version.current();
    let key = CacheKeys::catalog(
        &version,
        &config.config_hash,
        &media_type,
        &catalog_id,
        &extra,
        config.user_id.as_deref(),
    );
    let ttl = catalog_ttl(&state.config.cache.ttl, &catalog_id, config.is_user_specific());

    let pipeline = Pipeline {
        state: &state,
        config: &config,
        kind: RouteKind::Catalog,
        key,
        ttl,
        is_search: is_search_route(&catalog_id, extra.is_search()),
        headers: req.headers().clone(),
        socket: socket_addr(&req),
    };

    let raw_key = CacheKeys::raw_catalog(&version, &config.url_hash, &media_type, &catalog_id, &extra);
    pipeline
        .run(|| {
            let state = state.clone();
            let config = config.clone();
            let media_type = media_type.clone();
            let catalog_id = catalog_id.clone();
            let extra = extra.clone();
            async move {
                let raw = fetch_raw(
                    &state,
                    raw_key,
                    state.config.cache.ttl.raw_secs,
                    upstream_catalog_url(&config, &media_type, &catalog_id, &extra),
                )
                .await?;
                Ok(state.enricher.enrich_catalog(&raw, &config).await)
            }
        })
        .await
}

pub async fn meta(
    State(state): State<AppState>,
    Path((config_blob, media_type, id)): Path<(String, String, String)>,
    req: Request,
) -> Response {
    let config = match UserConfig::decode(&config_blob) {
        Ok(config) => config,
        Err(err) => return config_error_response(err),
    };

    let meta_id = strip_json_suffix(&id).to_string();
    let version = state.cache_version.current();
    let key = CacheKeys::meta(&version, &config.config_hash, &media_type, &meta_id);
    let ttl = Duration::from_secs(state.config.cache.ttl.meta_secs);

    let pipeline = Pipeline {
        state: &state,
        config: &config,
        kind: RouteKind::Meta,
        key,
        ttl,
        is_search: false,
        headers: req.headers().clone(),
        socket: socket_addr(&req),
    };

    let raw_key = CacheKeys::raw_meta(&version, &config.url_hash, &media_type, &meta_id);
    pipeline
        .run(|| {
            let state = state.clone();
            let config = config.clone();
            let media_type = media_type.clone();
            let meta_id = meta_id.clone();
            async move {
                let raw = fetch_raw(
                    &state,
                    raw_key,
                    state.config.cache.ttl.raw_secs,
                    upstream_meta_url(&config, &media_type, &meta_id),
                )
                .await?;
                Ok(state.enricher.enrich_meta(&raw, &config).await)
            }
        })
        .await
}

/// The shared pipeline: formatted-key lookup, single-flight around the
/// compute, write-back, and error-to-fallback conversion.
struct Pipeline<'a> {
    state: &'a AppState,
    config: &'a UserConfig,
    kind: RouteKind,
    key: String,
    ttl: Duration,
    is_search: bool,
    headers: HeaderMap,
    socket: Option<SocketAddr>,
}

impl Pipeline<'_> {
    async fn run<F, Fut>(self, produce: F) -> Response
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ProxyError>>,
    {
        self.state.hot_keys.track(&self.key);

        // Cache hits bypass the limiter entirely.
        if let Some(body) = self.state.cache.get_json::<Value>(&self.key).await {
            metrics::record_cache_disposition(self.kind.as_str(), "hit");
            return data_response(
                Bytes::from(body.to_string()),
                "hit",
            );
        }

        let disposition = if self.state.cache.is_active() {
            "miss"
        } else {
            "bypass"
        };

        let result = self
            .state
            .single_flight
            .get_or_compute(&self.key, || async {
                // Only the one compute call counts against the limit.
                let identity = ClientIdentity::from_request(
                    self.config.user_id.as_deref(),
                    &self.headers,
                    self.socket,
                );
                let tier = RateTier::select(&identity, self.is_search);
                let decision = self.state.limiter.check(&identity, tier).await;
                if !decision.allowed {
                    return Err(ProxyError::RateLimited {
                        limit: decision.limit,
                        remaining: decision.remaining,
                        retry_after_secs: decision.retry_after_secs,
                    });
                }

                let document = produce().await?;
                let bytes = Bytes::from(
                    serde_json::to_vec(&document)
                        .map_err(|e| ProxyError::Internal(e.to_string()))?,
                );

                // Write-back never blocks the response.
                self.state
                    .cache
                    .spawn_set_json(self.key.clone(), document, self.ttl);

                Ok(bytes)
            })
            .await;

        match result {
            Ok((bytes, outcome)) => {
                if outcome == FlightOutcome::Coalesced {
                    tracing::debug!(key = %self.key, "coalesced onto in-flight compute");
                }
                metrics::record_cache_disposition(self.kind.as_str(), disposition);
                data_response(bytes, disposition)
            }
            Err(err) => self.fallback(err, disposition),
        }
    }

    /// Shape-preserving degradation: an empty but valid body beats a
    /// non-200 for catalog and meta. Rate limiting is the one error that
    /// surfaces with its own status.
    fn fallback(&self, err: ProxyError, disposition: &'static str) -> Response {
        if matches!(err, ProxyError::RateLimited { .. }) {
            return err.into_response();
        }

        tracing::warn!(
            key = %self.key,
            kind = self.kind.as_str(),
            error = %err,
            "pipeline failure, serving fallback"
        );

        match self.kind {
            RouteKind::Catalog => {
                data_response(Bytes::from(json!({"metas": []}).to_string()), disposition)
            }
            RouteKind::Meta => {
                data_response(Bytes::from(json!({"meta": null}).to_string()), disposition)
            }
            RouteKind::Manifest => match err {
                ProxyError::UpstreamTimeout
                | ProxyError::UpstreamClient(_)
                | ProxyError::UpstreamServer(_) => (
                    StatusCode::BAD_REQUEST,
                    axum::Json(json!({"error": "upstream manifest unavailable"})),
                )
                    .into_response(),
                other => other.into_response(),
            },
        }
    }
}

/// Check the raw (format-agnostic) key; on a miss fetch upstream,
/// normalize legacy shapes, and write the raw key back asynchronously.
async fn fetch_raw(
    state: &AppState,
    raw_key: String,
    raw_ttl_secs: u64,
    url: String,
) -> Result<Value, ProxyError> {
    let raw_enabled = state.config.cache.raw_cache_enabled;

    if raw_enabled
        && let Some(doc) = state.cache.get_json::<Value>(&raw_key).await
    {
        return Ok(doc);
    }

    let mut doc = state.fetcher.fetch_json(&url).await?;
    normalize_legacy(&mut doc);

    if raw_enabled {
        state
            .cache
            .spawn_set_json(raw_key, doc.clone(), Duration::from_secs(raw_ttl_secs));
    }

    Ok(doc)
}

/// Older upstreams answer catalogs under `metasDetailed`.
fn normalize_legacy(doc: &mut Value) {
    if let Some(obj) = doc.as_object_mut()
        && !obj.contains_key("metas")
        && let Some(detailed) = obj.remove("metasDetailed")
    {
        obj.insert("metas".to_string(), detailed);
    }
}

/// Distinct configurations must install as distinct addons, so the
/// manifest id gets a config-hash suffix; the display name replaces the
/// upstream name when configured.
fn rewrite_manifest(mut doc: Value, config: &UserConfig) -> Value {
    if let Some(obj) = doc.as_object_mut() {
        let id = obj.get("id").and_then(Value::as_str).map(str::to_string);
        if let Some(id) = id {
            let suffix = &config.config_hash[..8.min(config.config_hash.len())];
            if !id.ends_with(suffix) {
                obj.insert(
                    "id".to_string(),
                    Value::String(format!("{id}.garnish.{suffix}")),
                );
            }
        }
        if let Some(name) = &config.display_name {
            obj.insert("name".to_string(), Value::String(name.clone()));
        }
    }
    doc
}

fn config_error_response(err: UserConfigError) -> Response {
    let message = match &err {
        UserConfigError::Decode(detail) => format!("config blob undecodable: {detail}"),
        UserConfigError::Invalid(detail) => detail.clone(),
    };
    ProxyError::ConfigInvalid(message).into_response()
}

fn strip_json_suffix(segment: &str) -> &str {
    segment.strip_suffix(".json").unwrap_or(segment)
}

/// Extra is `k=v&k=v…`, URL-decoded.
fn parse_extra(extra_raw: Option<&str>) -> CatalogExtra {
    let Some(raw) = extra_raw else {
        return CatalogExtra::default();
    };
    let pairs: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    CatalogExtra::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

fn upstream_base(config: &UserConfig) -> String {
    let base = config.upstream_base_url.as_str();
    base.strip_suffix("/manifest.json")
        .unwrap_or_else(|| base.trim_end_matches('/'))
        .to_string()
}

fn upstream_catalog_url(
    config: &UserConfig,
    media_type: &str,
    catalog_id: &str,
    extra: &CatalogExtra,
) -> String {
    let base = upstream_base(config);
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Some(page) = &extra.page {
        serializer.append_pair("skip", page);
    }
    if let Some(search) = &extra.search {
        serializer.append_pair("search", search);
    }
    if let Some(genre) = &extra.genre {
        serializer.append_pair("genre", genre);
    }
    let encoded = serializer.finish();

    if encoded.is_empty() {
        format!("{base}/catalog/{media_type}/{catalog_id}.json")
    } else {
        format!("{base}/catalog/{media_type}/{catalog_id}/{encoded}.json")
    }
}

fn upstream_meta_url(config: &UserConfig, media_type: &str, meta_id: &str) -> String {
    format!("{}/meta/{media_type}/{meta_id}.json", upstream_base(config))
}

fn socket_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0)
}

fn data_response(body: Bytes, disposition: &'static str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Cache", disposition)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
