// Scheduler binary entry point

use anyhow::{Context, Result};
use common::bootstrap::{default_registry, init_pg_store};
use common::config::Settings;
use common::scheduler::SchedulerNode;
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let observability = &settings.observability;
    telemetry::init_logging(
        &observability.log_level,
        observability.tracing_endpoint.as_deref(),
    )?;
    if let Some(port) = observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        namespace = %settings.scheduler.namespace,
        instance = %settings.scheduler.instance_name,
        "Starting cluster scheduler"
    );

    if !settings.scheduler.enabled {
        info!("Scheduler disabled by configuration, exiting");
        telemetry::shutdown_tracer();
        return Ok(());
    }

    let store = Arc::new(init_pg_store(&settings).await?);
    let registry = default_registry()?;
    let node = SchedulerNode::new(settings.scheduler.clone(), store, registry);

    node.start().await.context("Failed to start scheduler node")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal, initiating graceful shutdown");

    if let Err(e) = node.stop().await {
        error!(error = %e, "Error during scheduler shutdown");
    }

    info!("Scheduler stopped");
    telemetry::shutdown_tracer();
    Ok(())
}
