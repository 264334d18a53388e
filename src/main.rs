//! ProxyFlow gateway
//!
//! Accepts authenticated CONNECT requests, tunnels them through the
//! customer's allocated upstream proxy and records per-connection usage.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use proxyflow_db::{DbAllocationResolver, DbAnalyticsSink, DbUsageAccounting};
use proxyflow_gateway::{ConnectionHandler, GatewayListener};
use proxyflow_telemetry::UsageTracker;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level)?;

    info!("Starting ProxyFlow gateway {}", env!("GIT_TAG"));
    info!(
        "Listen address: {}:{}",
        config.listen_addr, config.listen_port
    );

    let db = proxyflow_db::connect(&config.database_url()?)
        .await
        .context("Failed to connect to the account database")?;
    let analytics_db = proxyflow_db::connect(&config.analytics_database_url()?)
        .await
        .context("Failed to connect to the analytics database")?;

    if config.run_migrations {
        proxyflow_db::migrate(&db)
            .await
            .context("Failed to migrate the account database")?;
        proxyflow_db::migrate_analytics(&analytics_db)
            .await
            .context("Failed to migrate the analytics database")?;
    }

    let tracker = UsageTracker::new(
        Arc::new(DbAnalyticsSink::new(analytics_db)),
        Arc::new(DbUsageAccounting::new(db.clone())),
        config.flush_interval(),
    );
    info!(
        "Usage tracker started (flush interval: {}s)",
        config.flush_interval
    );

    let handler = Arc::new(ConnectionHandler::new(
        Arc::new(DbAllocationResolver::new(db)),
        tracker.clone(),
        config.handler_config(),
    ));
    let listener = GatewayListener::new(config.gateway_config(), handler);

    let addr = listener
        .start()
        .await
        .context("Failed to start the gateway listener")?;
    info!("Gateway ready on {}", addr);

    wait_for_shutdown().await;

    info!(
        "Draining connections (timeout: {}s)",
        config.shutdown_timeout
    );
    if let Err(e) = listener.stop(config.shutdown_timeout()).await {
        warn!("Shutdown incomplete: {}", e);
    }

    if let Err(e) = tracker.close().await {
        error!("Final usage flush failed: {}", e);
    }

    info!("Gateway stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Error installing SIGTERM handler: {}", e);
                wait_for_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, shutting down");
        }
        Err(err) => {
            error!("Error listening for shutdown signal: {}", err);
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
