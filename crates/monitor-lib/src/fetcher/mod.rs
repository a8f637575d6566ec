//! Concurrent, time-windowed metric fetching
//!
//! For one lifecycle record every catalog query is bound to the container,
//! dispatched as its own task, and merged into a fresh [`FetchResult`].
//! Each call has its own timeout; the batch as a whole has a longer
//! deadline after which pending calls are abandoned while results that
//! already arrived are kept.

mod prometheus;
mod query;
mod result;

pub use prometheus::PrometheusClient;
pub use query::{bind_query, QueryRange};
pub use result::FetchResult;

use crate::catalog::{QueryCatalog, Target};
use crate::config::{FetchSettings, TargetServer};
use crate::error::QueryError;
use crate::models::{LifecycleRecord, Series};
use crate::observability::MonitorMetrics;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

/// Series and non-fatal warnings returned by one range query
#[derive(Debug, Clone, Default)]
pub struct RangeResponse {
    pub series: Vec<Series>,
    pub warnings: Vec<String>,
}

/// Trait for metrics backend implementations
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Run a range query over an explicit window and step
    async fn query_range(&self, query: &str, range: &QueryRange) -> Result<RangeResponse, QueryError>;
}

/// Configuration for fetch batches
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Sampling step of every range query (default: 500ms)
    pub step: Duration,
    /// Added after the die timestamp so the last sample is not cut (default: 5s)
    pub margin: Duration,
    /// Timeout of a single backend call (default: 10s)
    pub call_timeout: Duration,
    /// Deadline for the whole batch of one record (default: 12s)
    pub batch_deadline: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(500),
            margin: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            batch_deadline: Duration::from_secs(12),
        }
    }
}

impl FetchConfig {
    pub fn from_settings(fetch: &FetchSettings, server: &TargetServer) -> Self {
        Self {
            step: Duration::from_millis(fetch.step_ms.max(1)),
            margin: Duration::from_secs(fetch.margin_secs),
            call_timeout: server.call_timeout(),
            batch_deadline: Duration::from_secs(fetch.batch_deadline_secs),
        }
    }
}

/// Counters describing how one batch went
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Still pending when the batch deadline hit
    pub abandoned: usize,
    pub elapsed: Duration,
}

/// Merged result and report of one batch
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub result: FetchResult,
    pub report: FetchReport,
}

/// Result shared by the tasks of one batch; closed at the deadline
#[derive(Default)]
struct ResultSlot {
    result: FetchResult,
    closed: bool,
}

type SharedSlot = Arc<Mutex<ResultSlot>>;

/// Dispatches catalog queries for lifecycle records
pub struct MetricsFetcher {
    backend: Arc<dyn MetricsBackend>,
    config: FetchConfig,
    metrics: MonitorMetrics,
}

impl MetricsFetcher {
    pub fn new(backend: Arc<dyn MetricsBackend>, config: FetchConfig) -> Self {
        Self {
            backend,
            config,
            metrics: MonitorMetrics::new(),
        }
    }

    /// Fetch every catalog query for the record's lifetime
    pub async fn fetch(&self, catalog: &QueryCatalog, record: &LifecycleRecord) -> FetchOutcome {
        let start = Instant::now();
        let range = QueryRange::for_record(record, self.config.margin, self.config.step);
        let slot: SharedSlot = Arc::new(Mutex::new(ResultSlot::default()));
        let mut tasks = JoinSet::new();

        for spec in catalog.specs() {
            let call = QueryCall {
                target: spec.target,
                data_source: spec.data_source.clone(),
                name: spec.name.clone(),
                query: bind_query(spec, record),
            };
            let backend = self.backend.clone();
            let range = range.clone();
            let slot = slot.clone();
            let call_timeout = self.config.call_timeout;
            let metrics = self.metrics.clone();

            tasks.spawn(async move { call.run(backend, range, call_timeout, slot, metrics).await });
        }

        let dispatched = tasks.len();
        self.metrics.inc_queries_dispatched(dispatched);
        debug!(
            container = %record.name,
            queries = dispatched,
            start = %range.start,
            end = %range.end,
            "Dispatched fetch batch"
        );

        let mut failed = 0;
        let drained = timeout(self.config.batch_deadline, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(true) => {}
                    Ok(false) => failed += 1,
                    Err(e) => {
                        error!(error = %e, "Query task panicked");
                        failed += 1;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                container = %record.name,
                pending = tasks.len(),
                deadline_ms = self.config.batch_deadline.as_millis() as u64,
                "Fetch batch deadline reached, abandoning pending queries"
            );
            tasks.abort_all();
        }

        let result = {
            let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.closed = true;
            std::mem::take(&mut slot.result)
        };

        let succeeded = result.len();
        let abandoned = dispatched.saturating_sub(succeeded + failed);
        if abandoned > 0 {
            self.metrics.inc_queries_abandoned(abandoned);
        }

        let elapsed = start.elapsed();
        self.metrics.observe_fetch_latency(elapsed);

        FetchOutcome {
            result,
            report: FetchReport {
                dispatched,
                succeeded,
                failed,
                abandoned,
                elapsed,
            },
        }
    }
}

/// One bound query and the coordinates its result is stored under
struct QueryCall {
    target: Target,
    data_source: String,
    name: String,
    query: String,
}

impl QueryCall {
    /// Returns true if the series were merged into the batch result
    async fn run(
        self,
        backend: Arc<dyn MetricsBackend>,
        range: QueryRange,
        call_timeout: Duration,
        slot: SharedSlot,
        metrics: MonitorMetrics,
    ) -> bool {
        let response = match timeout(call_timeout, backend.query_range(&self.query, &range)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.log_failure(&e);
                metrics.inc_queries_failed();
                return false;
            }
            Err(_) => {
                self.log_failure(&QueryError::Timeout(call_timeout));
                metrics.inc_queries_failed();
                return false;
            }
        };

        if !response.warnings.is_empty() {
            warn!(
                monitoring_target = %self.target,
                query = %self.query,
                warnings = ?response.warnings,
                "Metrics backend returned warnings"
            );
        }
        if response.series.is_empty() {
            warn!(monitoring_target = %self.target, query = %self.query, "Query returned no series");
        }

        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.closed {
            return false;
        }
        slot.result
            .insert(self.target, &self.data_source, &self.name, response.series)
    }

    fn log_failure(&self, error: &QueryError) {
        error!(
            monitoring_target = %self.target,
            source = %self.data_source,
            name = %self.name,
            query = %self.query,
            error = %error,
            "Range query failed"
        );
    }
}
