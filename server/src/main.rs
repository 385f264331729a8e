//! RateCache Server Binary
//!
//! Serves current exchange rates from a stale-while-revalidate cache.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratecache_core::{OpenExchangeRatesFetcher, RateCacheService};
use ratecache_server::{router, AppState, ServerConfig, Storage, SyncScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting RateCache server");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let storage = Storage::open(&config.storage).await.map_err(|e| {
        error!(error = %e, "Failed to connect to database");
        e
    })?;

    let fetcher = Arc::new(OpenExchangeRatesFetcher::new(config.provider.clone())?);
    let (service, worker) = RateCacheService::start(
        fetcher,
        storage.rates.clone(),
        storage.audit_writer.clone(),
        config.cache.clone(),
    );

    if let Err(e) = service.sync_on_launch().await {
        error!(
            error_code = e.error_code(),
            error = %e.chain(),
            "Initial sync with provider failed"
        );
        worker.shutdown().await;
        storage.close().await;
        return Err(e.into());
    }

    let scheduler = config
        .sync
        .interval
        .map(|period| SyncScheduler::start(service.clone(), period));

    let state = AppState::new(
        service.clone(),
        storage.audit_reader.clone(),
        config.trust_proxy,
    );
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(
        listen_addr = %config.listen_addr,
        listen_port = config.listen_port,
        ttl_ms = config.cache.ttl_ms,
        "Backend ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    worker.shutdown().await;
    storage.close().await;

    info!("RateCache shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
