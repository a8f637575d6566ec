//! Task monitor - per-task resource usage of workload containers
//!
//! Watches the local container runtime for workload containers, and once
//! one dies fetches every configured metric over its lifetime from the
//! metrics backend and writes it out as CSV.

use anyhow::{Context, Result};
use monitor_lib::{
    catalog::QueryCatalog,
    config::MonitorConfig,
    fetcher::{FetchConfig, MetricsFetcher, PrometheusClient},
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    output::{AuditLog, CsvSink, ResultWriter, StatsLog},
    pipeline::Pipeline,
    runtime::{ContainerRuntime, DockerRuntime},
    watcher::{EventWatcher, WatcherConfig},
};
use std::sync::Arc;
use task_monitor::{api, config::ProcessConfig};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting task-monitor");

    let process = ProcessConfig::load()?;
    let config = MonitorConfig::load(&process.config)
        .with_context(|| format!("Cannot load {}", process.config.display()))?;
    info!(
        node_name = %process.node_name,
        config = %process.config.display(),
        "Monitor configured"
    );

    let catalog = Arc::new(QueryCatalog::build(&config.monitoring_targets));
    if catalog.is_empty() {
        warn!("Query catalog is empty, only audit trails will be written");
    }

    let runtime = DockerRuntime::connect()?;
    runtime
        .ping()
        .await
        .context("Container runtime is not reachable")?;

    let target_server = &config.server_configurations.prometheus.target_server;
    let backend = PrometheusClient::new(&target_server.url()?, target_server.call_timeout())?;
    info!(address = %backend.base_url(), "Metrics backend configured");

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&process.node_name);
    logger.log_startup(MONITOR_VERSION, catalog.len());

    let (shutdown_tx, _) = broadcast::channel(1);
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(
        process.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let sink = Arc::new(CsvSink::new());
    let audit = Arc::new(AuditLog::new(
        &config.output.results_dir,
        &config.output.audit_prefix,
        sink.clone(),
    ));
    let writer = Arc::new(ResultWriter::new(&config.output.results_dir, sink));
    let fetcher = Arc::new(MetricsFetcher::new(
        Arc::new(backend),
        FetchConfig::from_settings(&config.fetch, target_server),
    ));

    let (watcher, records) = EventWatcher::new(
        Arc::new(runtime),
        WatcherConfig::from_settings(&config.watcher)?,
        audit,
        logger.clone(),
    );
    let mut watcher = watcher.with_health(health_registry.clone());
    if let Some(interval) = config.watcher.stats_interval() {
        let stats = Arc::new(StatsLog::new(&config.output.results_dir));
        watcher = watcher.with_stats(stats, interval);
    }
    let pipeline = Pipeline::new(catalog, fetcher, writer, logger.clone())
        .with_idle_interval(target_server.poll_interval())
        .with_health(health_registry.clone());

    let mut watcher_handle = tokio::spawn(watcher.run(shutdown_tx.subscribe()));
    let pipeline_handle = tokio::spawn(pipeline.run(records, shutdown_tx.subscribe()));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        _ = &mut watcher_handle => {
            logger.log_shutdown("runtime event stream ended");
        }
    }

    let _ = shutdown_tx.send(());

    if !watcher_handle.is_finished() {
        watcher_handle.await?;
    }
    pipeline_handle.await?;
    if let Err(e) = api_handle.await? {
        error!(error = %e, "Health server failed");
    }

    info!("Shutdown complete");
    Ok(())
}
