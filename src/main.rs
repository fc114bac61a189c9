//! Swap Coordinator - order lifecycle and secret relay for cross-chain HTLC swaps
//!
//! Tracks swap orders from submission to settlement, watches reported escrow
//! deposits and withdrawals, and relays the maker's secret to the resolver
//! once both legs are funded.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod api;
mod config;
mod error;
mod events;
mod metrics;
mod monitor;
mod order;
mod relay;
mod store;

use config::{Settings, StoreBackend};
use events::OrderEventBus;
use metrics::MetricsServer;
use monitor::EscrowMonitor;
use relay::SecretRelay;
use store::{MemoryOrderRepository, OrderRepository, OrderStore, PgOrderRepository};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Swap Coordinator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration: {} supported chains, {:?} order store",
        settings.orders.supported_chains.len(),
        settings.database.backend
    );

    // Initialize order repository
    let repository: Arc<dyn OrderRepository> = match settings.database.backend {
        StoreBackend::Postgres => {
            let repository = PgOrderRepository::connect(&settings.database).await?;
            info!("Database connection established");
            repository.run_migrations().await?;
            Arc::new(repository)
        }
        StoreBackend::Memory => Arc::new(MemoryOrderRepository::new()),
    };

    let store = Arc::new(OrderStore::new(
        repository,
        OrderEventBus::new(settings.monitor.event_buffer),
        settings.orders.clone(),
        settings.pagination,
    ));
    let relay = Arc::new(SecretRelay::new(store.clone()));
    let monitor = Arc::new(EscrowMonitor::new(
        store.clone(),
        relay.clone(),
        settings.monitor.clone(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let store = store.clone();
        let relay = relay.clone();
        async move {
            if let Err(e) = api::run_server(config, store, relay).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start escrow monitor
    let monitor_handle = tokio::spawn({
        let monitor = monitor.clone();
        async move {
            if let Err(e) = monitor.run().await {
                error!("Escrow monitor error: {}", e);
            }
        }
    });

    info!("Swap Coordinator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    info!("Sessions: ws://{}:{}/ws", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Let an in-flight sweep finish before tearing down the rest
    monitor.stop();
    if let Err(e) = monitor_handle.await {
        error!("Escrow monitor task failed: {}", e);
    }

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swap Coordinator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,swap_coordinator=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
