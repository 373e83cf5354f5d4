use std::{net::SocketAddr, sync::Arc};

use clap::Parser;

mod cache;
mod config;
mod enrich;
mod error;
mod limiter;
mod observability;
mod providers;
mod routes;
mod upstream;

#[cfg(test)]
mod tests;

use cache::{Cache, CacheTier, CacheVersion, HotKeyTracker, SingleFlight};
use config::ProxyConfig;
use enrich::{Consolidator, Enricher};
use limiter::RateLimiter;
use providers::ProviderRegistry;
use upstream::UpstreamFetcher;

/// Process-scoped shared state, cloned per request. Everything that the
/// handlers touch — cache tier, limiter, providers, fetcher — hangs off
/// this struct; there are no global singletons besides the metrics
/// recorder.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub http_client: reqwest::Client,
    pub cache: Arc<CacheTier>,
    pub cache_version: Arc<CacheVersion>,
    pub single_flight: Arc<SingleFlight>,
    pub limiter: Arc<RateLimiter>,
    pub hot_keys: Arc<HotKeyTracker>,
    pub fetcher: Arc<UpstreamFetcher>,
    pub providers: Arc<ProviderRegistry>,
    pub enricher: Arc<Enricher>,
}

impl AppState {
    /// Build the state with the store selected by configuration: Redis
    /// when a URL is present, otherwise a disabled tier (every response
    /// marks `X-Cache: bypass`).
    pub async fn new(config: ProxyConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Option<Arc<dyn Cache>> = match config.cache.store_config() {
            Some(store_config) => {
                #[cfg(feature = "redis")]
                {
                    let redis = cache::RedisCache::from_config(&store_config).await?;
                    tracing::info!(url = %store_config.url, "cache store connected");
                    Some(Arc::new(redis))
                }
                #[cfg(not(feature = "redis"))]
                {
                    let _ = store_config;
                    return Err("REDIS_URL configured but the 'redis' feature is not enabled. \
                        Rebuild with: cargo build --features redis"
                        .into());
                }
            }
            None => {
                tracing::warn!("no cache store configured; running in bypass mode");
                None
            }
        };

        Ok(Self::with_store(config, store))
    }

    /// Assemble the component graph over an explicit store. Tests use
    /// this with the in-memory backend.
    pub fn with_store(config: ProxyConfig, store: Option<Arc<dyn Cache>>) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(config.server.user_agent.clone())
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("http client construction cannot fail with static options");

        let cache = Arc::new(CacheTier::new(store));
        let cache_version = Arc::new(CacheVersion::new(config.cache.version.clone()));

        let limiter = Arc::new(RateLimiter::new(
            Arc::clone(&cache),
            Arc::clone(&cache_version),
            config.limits.clone(),
        ));
        let hot_keys = Arc::new(HotKeyTracker::new(Arc::clone(&cache)));
        let fetcher = Arc::new(UpstreamFetcher::new(
            http_client.clone(),
            config.enrichment.upstream_timeout_secs,
            config.enrichment.upstream_retries,
        ));

        let providers = Arc::new(ProviderRegistry::new(
            http_client.clone(),
            &config.enrichment,
            &config.cache.ttl,
            Arc::clone(&cache),
            Arc::clone(&cache_version),
        ));
        let consolidator = Arc::new(Consolidator::new(
            Arc::clone(&providers),
            Arc::clone(&cache),
            Arc::clone(&cache_version),
            config.cache.ttl.consolidated_secs,
            config.enrichment.concurrency,
        ));
        let enricher = Arc::new(Enricher::new(
            consolidator,
            Arc::clone(&providers),
            config.enrichment.concurrency,
        ));

        Self {
            config: Arc::new(config),
            http_client,
            cache,
            cache_version,
            single_flight: Arc::new(SingleFlight::new()),
            limiter,
            hot_keys,
            fetcher,
            providers,
            enricher,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "garnish", version, about)]
struct Cli {
    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Bind address (overrides HOST).
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_tracing();

    if let Err(e) = observability::metrics::init_metrics() {
        tracing::warn!(error = %e, "metrics exporter not installed");
    }

    let cli = Cli::parse();
    let mut config = ProxyConfig::from_env()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config).await?;
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "garnish listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
