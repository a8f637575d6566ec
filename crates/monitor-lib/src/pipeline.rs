//! Drives fetch and write for every lifecycle record
//!
//! Each record is processed in its own task, so a slow batch for one
//! container never holds back the next one.

use crate::catalog::QueryCatalog;
use crate::fetcher::{FetchReport, MetricsFetcher};
use crate::health::{components, HealthRegistry, LastRecord};
use crate::models::LifecycleRecord;
use crate::observability::StructuredLogger;
use crate::output::{ResultWriter, WriteReport};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// What happened to one lifecycle record
#[derive(Debug, Clone, Default)]
pub struct ProcessReport {
    pub fetch: FetchReport,
    pub write: WriteReport,
}

/// Consumer of the watcher's lifecycle queue
#[derive(Clone)]
pub struct Pipeline {
    catalog: Arc<QueryCatalog>,
    fetcher: Arc<MetricsFetcher>,
    writer: Arc<ResultWriter>,
    logger: StructuredLogger,
    idle_interval: Duration,
    health: Option<HealthRegistry>,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<QueryCatalog>,
        fetcher: Arc<MetricsFetcher>,
        writer: Arc<ResultWriter>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            writer,
            logger,
            idle_interval: Duration::from_secs(10),
            health: None,
        }
    }

    /// Interval without records after which an idle notice is logged
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Report fetcher and writer health and the last record after every record
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Consume records until the queue closes or shutdown is signalled
    pub async fn run(
        self,
        mut records: mpsc::Receiver<LifecycleRecord>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            queries = self.catalog.len(),
            idle_secs = self.idle_interval.as_secs(),
            "Starting pipeline"
        );

        let mut tasks = JoinSet::new();
        let mut idle_logged = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Pipeline received shutdown signal");
                    break;
                }
                record = records.recv() => match record {
                    Some(record) => {
                        idle_logged = false;
                        let pipeline = self.clone();
                        tasks.spawn(async move {
                            let name = record.name.clone();
                            if let Err(e) = pipeline.process(record).await {
                                error!(name = %name, error = %e, "Failed to process lifecycle record");
                            }
                        });
                    }
                    None => {
                        info!("Lifecycle queue closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Pipeline task failed");
                    }
                }
                _ = tokio::time::sleep(self.idle_interval), if !idle_logged => {
                    info!(idle_secs = self.idle_interval.as_secs(), "No container finished recently, waiting");
                    idle_logged = true;
                }
            }
        }

        debug!(in_flight = tasks.len(), "Waiting for in-flight records");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Pipeline task failed");
            }
        }

        info!("Pipeline stopped");
    }

    /// Fetch every catalog query for one record and write the results
    pub async fn process(&self, record: LifecycleRecord) -> Result<ProcessReport> {
        let outcome = self.fetcher.fetch(&self.catalog, &record).await;
        let fetch = outcome.report;

        self.logger.log_fetch_completed(
            &record.name,
            fetch.dispatched,
            fetch.succeeded,
            fetch.failed,
            fetch.abandoned,
            fetch.elapsed,
        );

        let writer = self.writer.clone();
        let catalog = self.catalog.clone();
        let result = outcome.result;
        let write = tokio::task::spawn_blocking(move || writer.write(&catalog, &result))
            .await
            .context("Result writer task failed")?;

        debug!(
            name = %record.name,
            files = write.files_written,
            rows = write.rows_written,
            failed = write.failed,
            "Results written"
        );

        if let Some(health) = &self.health {
            if fetch.failed + fetch.abandoned > 0 {
                health
                    .set_degraded(
                        components::FETCHER,
                        format!(
                            "{} of {} queries missing for {}",
                            fetch.failed + fetch.abandoned,
                            fetch.dispatched,
                            record.name
                        ),
                    )
                    .await;
            } else {
                health.set_healthy(components::FETCHER).await;
            }

            if write.failed > 0 {
                health
                    .set_degraded(
                        components::WRITER,
                        format!("{} result files failed for {}", write.failed, record.name),
                    )
                    .await;
            } else {
                health.set_healthy(components::WRITER).await;
            }

            health
                .record_processed(LastRecord {
                    name: record.name.clone(),
                    queries: fetch.dispatched,
                    missing: fetch.failed + fetch.abandoned,
                    files_written: write.files_written,
                    finished_at: chrono::Utc::now(),
                })
                .await;
        }

        Ok(ProcessReport { fetch, write })
    }
}
