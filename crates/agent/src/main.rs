//! Admission Agent - host-local admission control service
//!
//! Samples host resources in the background and answers admission,
//! concurrency and estimation queries over HTTP.

use admission_lib::{
    create_collector,
    health::HealthRegistry,
    AdmissionMetrics, ResourceMonitor, StructuredLogger, TaskResourceEstimator,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting admission-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        api_port = config.api_port,
        cpu_threshold = config.cpu_threshold,
        memory_threshold = config.memory_threshold,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_monitor_components().await;

    let metrics = AdmissionMetrics::new();
    let monitor = Arc::new(
        ResourceMonitor::builder()
            .config(config.monitor_config())
            .collector(create_collector())
            .metrics(metrics)
            .health(health_registry.clone())
            .build()?,
    );
    monitor.add_observer(Arc::new(metrics)).await;

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION, monitor.collector_name());

    monitor.start_monitoring().await;

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        monitor.clone(),
        Arc::new(TaskResourceEstimator::new()),
        logger.clone(),
    ));

    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = shutdown_rx.await;
    }));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    monitor.stop_monitoring().await;
    info!("Shutdown complete");

    Ok(())
}
