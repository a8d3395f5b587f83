//! Cost Agent - cloud cost anomaly remediation service
//!
//! Polls cost observations, detects deviations from configured baselines,
//! applies policy-gated remediations and serves health, metrics and savings
//! reports over HTTP.

use anyhow::Result;
use cost_lib::{
    anomaly::LogSink,
    health::HealthRegistry,
    observability::StructuredLogger,
    remediation::StaticCredentialProvider,
    source::SimulatedSource,
    Pipeline,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cost-agent");

    let config = config::AgentConfig::load()?;
    info!(
        instance = %config.instance_name,
        interval_secs = config.collection_interval_secs,
        baselines = config.pipeline.baselines.len(),
        "Agent configured"
    );

    let source = SimulatedSource::new()
        .with_cost_range(config.simulated_min_cost..config.simulated_max_cost)?;
    let notifier = LogSink::new().with_dedup_window(config.notification_dedup());

    let health_registry = HealthRegistry::new();
    let pipeline = Pipeline::builder(config.pipeline.clone())
        .source(Arc::new(source))
        .credentials(Arc::new(StaticCredentialProvider::all()))
        .notifier(Arc::new(notifier))
        .health(health_registry)
        .instance(&config.instance_name)
        .interval(config.collection_interval())
        .jitter(config.jitter())
        .build()
        .await?;

    let app_state = Arc::new(api::AppState::new(pipeline.handles().clone()));
    let (shutdown_tx, _) = broadcast::channel(1);

    // Start health, metrics and report server
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));
    let pipeline_handle = tokio::spawn(pipeline.run(shutdown_tx.clone()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    match pipeline_handle.await {
        Ok(report) => info!(
            remediated = report.remediation.remediated,
            total_savings = report.summary.total_savings,
            "Pipeline drained"
        ),
        Err(e) => error!(error = %e, "Pipeline task failed"),
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
