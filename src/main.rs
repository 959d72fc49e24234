//! Edge Shield Server
//!
//! Loads configuration, sets up logging, installs the cache generation and
//! serves HTTP until interrupted.

use anyhow::Context;
use edge_shield::{
    CacheStore, DiskCacheStore, EdgeProxy, EdgeServer, GenerationManager, MemoryCacheStore,
    MetricsEndpoint, NetworkFetcher, PolicyMetrics, ReqwestFetcher, RetryQueue, ShieldConfig,
    TierNames,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main entry point for the Edge Shield server
///
/// # Usage
/// ```bash
/// # Start with default config (edge_shield.yaml)
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Edge Shield Server");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "edge_shield.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = match ShieldConfig::from_file(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            info!("  - Listen address: {}", cfg.listen_address);
            info!("  - Upstream origin: {:?}", cfg.upstream_origin);
            info!("  - Serving origin: {:?}", cfg.policy.serving_origin);
            info!("  - Static manifest: {} entries", cfg.classifier.static_manifest.len());
            info!("  - Cache backend: {}", cfg.cache.backend);
            info!("  - Cache generation: {}", cfg.cache.generation);
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure the configuration file exists and is valid");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);
    if config.policy.serving_origin.is_none() {
        warn!("policy.serving_origin is not set: site referers are not recognised and the development host bypass is off");
    }

    let store: Arc<dyn CacheStore> = match config.cache.backend.as_str() {
        "disk" => Arc::new(
            DiskCacheStore::new(&config.cache.disk_dir)
                .await
                .context("failed to open disk cache")?,
        ),
        _ => Arc::new(MemoryCacheStore::new()),
    };

    let mut fetcher = ReqwestFetcher::new().context("failed to build HTTP client")?;
    if let Some(upstream) = &config.upstream_origin {
        fetcher = fetcher.with_upstream(upstream)?;
    }
    let fetcher: Arc<dyn NetworkFetcher> = Arc::new(fetcher);

    // Install and activate this generation before taking traffic
    let precache_origin = config
        .policy
        .serving_origin
        .clone()
        .or_else(|| config.upstream_origin.clone());
    if precache_origin.is_none() {
        warn!("Neither serving_origin nor upstream_origin is set, relative manifest entries are not precached");
    }
    let generation = Arc::new(GenerationManager::new(
        store.clone(),
        fetcher.clone(),
        TierNames::from_config(&config.cache),
        config.classifier.static_manifest.clone(),
        precache_origin,
    ));
    let precached = generation.install().await.context("install failed")?;
    let stale = generation.stale_tiers().await.context("failed to list cache tiers")?;
    if stale.is_empty() {
        generation.activate().await.context("activation failed")?;
        info!(
            "Generation {} active: {} entries precached",
            config.cache.generation, precached
        );
    } else {
        info!(
            "Generation {} waiting: {} entries precached, {} tiers of earlier generations kept until SKIP_WAITING",
            config.cache.generation,
            precached,
            stale.len()
        );
    }

    let mut proxy = EdgeProxy::new(config.clone(), store.clone(), fetcher.clone());
    match PolicyMetrics::new() {
        Ok(policy_metrics) => proxy = proxy.with_policy_metrics(Arc::new(policy_metrics)),
        Err(e) => warn!("Policy metrics disabled: {}", e),
    }
    let proxy = Arc::new(proxy);

    if let Some(endpoint_config) = &config.metrics_endpoint {
        if endpoint_config.enabled {
            let addr: SocketAddr = endpoint_config
                .address
                .parse()
                .context("invalid metrics endpoint address")?;
            let endpoint = MetricsEndpoint::new(proxy.metrics_arc(), addr);
            tokio::spawn(async move {
                if let Err(e) = endpoint.start().await {
                    error!("Metrics endpoint stopped: {}", e);
                }
            });
        }
    }

    let server = EdgeServer::new(proxy.clone())
        .with_generation(generation)
        .with_retry_queue(Arc::new(RetryQueue::new(fetcher)));
    let addr: SocketAddr = config
        .listen_address
        .parse()
        .context("invalid listen address")?;

    tokio::select! {
        result = server.run(addr) => {
            result.context("server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    proxy.writer().flush().await;
    proxy.writer().shutdown();

    let stats = proxy.metrics().get_stats();
    info!(
        "Served {} requests, cache hit rate {:.2}%",
        stats.total_requests,
        stats.cache_hit_rate()
    );
    Ok(())
}
