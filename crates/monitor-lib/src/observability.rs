//! Observability infrastructure for the task monitor
//!
//! Provides:
//! - Prometheus metrics (event handling, query fan-out, output volume)
//! - Structured JSON logging of lifecycle events with tracing

use crate::models::LifecycleRecord;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for fetch batch latency (in seconds)
const FETCH_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 12.5, 15.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    events_received: IntCounterVec,
    duplicate_events: IntCounter,
    inspection_errors: IntCounter,
    orphaned_dies: IntCounter,
    missing_pids: IntCounter,
    stats_samples: IntCounter,
    records_emitted: IntCounter,
    records_dropped: IntCounter,
    tracked_containers: IntGauge,
    queries_dispatched: IntCounter,
    queries_failed: IntCounter,
    queries_abandoned: IntCounter,
    fetch_latency_seconds: Histogram,
    rows_written: IntCounter,
    output_errors: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            events_received: register_int_counter_vec!(
                "task_monitor_events_received_total",
                "Container runtime events received, by action",
                &["action"]
            )
            .expect("Failed to register events_received"),

            duplicate_events: register_int_counter!(
                "task_monitor_duplicate_events_total",
                "Start or die events ignored as duplicates"
            )
            .expect("Failed to register duplicate_events"),

            inspection_errors: register_int_counter!(
                "task_monitor_inspection_errors_total",
                "Container inspections that failed"
            )
            .expect("Failed to register inspection_errors"),

            orphaned_dies: register_int_counter!(
                "task_monitor_orphaned_dies_total",
                "Die events without a captured start"
            )
            .expect("Failed to register orphaned_dies"),

            missing_pids: register_int_counter!(
                "task_monitor_missing_pids_total",
                "Workload starts whose process was already gone when inspected"
            )
            .expect("Failed to register missing_pids"),

            stats_samples: register_int_counter!(
                "task_monitor_stats_samples_total",
                "Raw runtime stats snapshots written"
            )
            .expect("Failed to register stats_samples"),

            records_emitted: register_int_counter!(
                "task_monitor_lifecycle_records_total",
                "Lifecycle records handed to the pipeline"
            )
            .expect("Failed to register records_emitted"),

            records_dropped: register_int_counter!(
                "task_monitor_lifecycle_records_dropped_total",
                "Lifecycle records dropped because the queue stayed full"
            )
            .expect("Failed to register records_dropped"),

            tracked_containers: register_int_gauge!(
                "task_monitor_tracked_containers",
                "Container ids currently held in correlation state"
            )
            .expect("Failed to register tracked_containers"),

            queries_dispatched: register_int_counter!(
                "task_monitor_queries_dispatched_total",
                "Range queries dispatched to the metrics backend"
            )
            .expect("Failed to register queries_dispatched"),

            queries_failed: register_int_counter!(
                "task_monitor_queries_failed_total",
                "Range queries that returned an error or unexpected shape"
            )
            .expect("Failed to register queries_failed"),

            queries_abandoned: register_int_counter!(
                "task_monitor_queries_abandoned_total",
                "Range queries abandoned at the batch deadline"
            )
            .expect("Failed to register queries_abandoned"),

            fetch_latency_seconds: register_histogram!(
                "task_monitor_fetch_latency_seconds",
                "Wall time of one fetch batch",
                FETCH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register fetch_latency_seconds"),

            rows_written: register_int_counter!(
                "task_monitor_rows_written_total",
                "CSV data rows written"
            )
            .expect("Failed to register rows_written"),

            output_errors: register_int_counter!(
                "task_monitor_output_errors_total",
                "Output files skipped because of filesystem errors"
            )
            .expect("Failed to register output_errors"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn inc_events_received(&self, action: &str) {
        self.inner()
            .events_received
            .with_label_values(&[action])
            .inc();
    }

    pub fn inc_duplicate_events(&self) {
        self.inner().duplicate_events.inc();
    }

    pub fn inc_inspection_errors(&self) {
        self.inner().inspection_errors.inc();
    }

    pub fn inc_orphaned_dies(&self) {
        self.inner().orphaned_dies.inc();
    }

    pub fn inc_missing_pids(&self) {
        self.inner().missing_pids.inc();
    }

    pub fn inc_stats_samples(&self) {
        self.inner().stats_samples.inc();
    }

    pub fn inc_records_emitted(&self) {
        self.inner().records_emitted.inc();
    }

    pub fn inc_records_dropped(&self) {
        self.inner().records_dropped.inc();
    }

    pub fn set_tracked_containers(&self, count: usize) {
        self.inner().tracked_containers.set(count as i64);
    }

    pub fn inc_queries_dispatched(&self, count: usize) {
        self.inner().queries_dispatched.inc_by(count as u64);
    }

    pub fn inc_queries_failed(&self) {
        self.inner().queries_failed.inc();
    }

    pub fn inc_queries_abandoned(&self, count: usize) {
        self.inner().queries_abandoned.inc_by(count as u64);
    }

    pub fn observe_fetch_latency(&self, elapsed: Duration) {
        self.inner()
            .fetch_latency_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_rows_written(&self, count: usize) {
        self.inner().rows_written.inc_by(count as u64);
    }

    pub fn inc_output_errors(&self) {
        self.inner().output_errors.inc();
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging of container lifecycles
/// and fetch batches.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a workload container start
    pub fn log_container_started(&self, name: &str, container_id: &str, pid: i64, work_dir: &str) {
        info!(
            event = "container_started",
            node = %self.node_name,
            name = %name,
            container_id = %container_id,
            pid = pid,
            work_dir = %work_dir,
            "Workload container started"
        );
    }

    /// Log a correlated workload container death
    pub fn log_container_died(&self, record: &LifecycleRecord) {
        info!(
            event = "container_died",
            node = %self.node_name,
            name = %record.name,
            container_id = %record.container_id,
            pid = record.pid,
            lifetime_ms = record.lifetime().as_millis() as u64,
            "Workload container died"
        );
    }

    /// Log the outcome of one fetch batch
    pub fn log_fetch_completed(
        &self,
        name: &str,
        dispatched: usize,
        succeeded: usize,
        failed: usize,
        abandoned: usize,
        elapsed: Duration,
    ) {
        if failed + abandoned > 0 {
            warn!(
                event = "fetch_completed",
                node = %self.node_name,
                name = %name,
                dispatched = dispatched,
                succeeded = succeeded,
                failed = failed,
                abandoned = abandoned,
                elapsed_ms = elapsed.as_millis() as u64,
                "Fetch batch completed with missing results"
            );
        } else {
            info!(
                event = "fetch_completed",
                node = %self.node_name,
                name = %name,
                dispatched = dispatched,
                succeeded = succeeded,
                elapsed_ms = elapsed.as_millis() as u64,
                "Fetch batch completed"
            );
        }
    }

    pub fn log_startup(&self, version: &str, queries: usize) {
        info!(
            event = "monitor_started",
            node = %self.node_name,
            version = %version,
            queries = queries,
            "Task monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Task monitor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_creation() {
        let metrics = MonitorMetrics::new();

        metrics.inc_events_received("start");
        metrics.inc_duplicate_events();
        metrics.inc_queries_dispatched(3);
        metrics.inc_queries_abandoned(1);
        metrics.observe_fetch_latency(Duration::from_millis(250));
        metrics.inc_rows_written(10);
        metrics.set_tracked_containers(2);
    }

    #[test]
    fn test_render_includes_monitor_metrics() {
        let metrics = MonitorMetrics::new();
        metrics.inc_missing_pids();
        metrics.inc_stats_samples();

        let text = metrics.render().unwrap();
        assert!(text.contains("task_monitor_missing_pids_total"));
        assert!(text.contains("task_monitor_stats_samples_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
    }
}
