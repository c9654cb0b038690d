//! # Service Orchestrator - Main Entry Point
//!
//! Runs the orchestration core as a standalone process:
//!
//! 1. load the YAML configuration (`ORCHESTRATOR_CONFIG_PATH`, default
//!    `config/orchestrator.yaml`) with environment overrides applied
//! 2. initialize logging and, when configured, the Prometheus exporter
//! 3. register the configured services and start the health monitor and
//!    auto-scaler, using HTTP to reach instances
//! 4. run until SIGINT/SIGTERM, then shut down cleanly; orchestration events
//!    are written to the log as they happen

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use metrics_exporter_prometheus::PrometheusBuilder;
use service_orchestrator::observability::init_logging;
use service_orchestrator::transport::HttpServiceCaller;
use service_orchestrator::{Orchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("ORCHESTRATOR_CONFIG_PATH")
        .unwrap_or_else(|_| "config/orchestrator.yaml".to_string());

    let config = OrchestratorConfig::load_from_file(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_logging(&config.logging);
    info!("🚀 Starting service orchestrator");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Some(address) = config.metrics_listen_address {
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("📊 Metrics available on http://{}/metrics", address);
    }

    let caller = HttpServiceCaller::new().context("Failed to create HTTP caller")?;
    let orchestrator = Orchestrator::new(config, Arc::new(caller)).context("Failed to build orchestrator")?;

    for summary in orchestrator.list_services() {
        info!(
            service = %summary.name,
            version = %summary.version,
            instances = summary.instances,
            "Service ready"
        );
    }

    orchestrator.start().context("Failed to start background tasks")?;
    info!("✅ Orchestrator running");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, stopping background tasks...");
    orchestrator.shutdown().await;

    info!("✅ Service orchestrator shutdown complete");
    Ok(())
}

/// Wait for SIGINT, or SIGTERM on unix
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("📡 Received SIGTERM"),
    }
}
