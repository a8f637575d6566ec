//! Runtime event subscription loop
//!
//! A single reader drains the runtime's event feed and hands every event
//! to its own task, so a slow inspection never delays later events.
//! Event tasks share one [`CorrelationState`] behind a mutex that is only
//! taken for check-and-mark and pid insert/lookup, never across an
//! inspection call.

use super::correlation::{CorrelationState, StartInfo};
use super::stats::StatsSampler;
use crate::config::WatcherSettings;
use crate::error::{ConfigError, RuntimeError};
use crate::health::{components, HealthRegistry};
use crate::models::{ContainerDetails, EventAction, LifecycleRecord, RuntimeEvent};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::output::{AuditLog, StartEntry, StatsLog};
use crate::runtime::ContainerRuntime;
use regex::Regex;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Configuration for the event watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Names of workload containers, matched against the runtime name
    pub name_pattern: Regex,
    /// Capacity of the lifecycle record queue (default: 256)
    pub queue_capacity: usize,
    /// How long a ready record waits for queue space (default: 5 seconds)
    pub enqueue_timeout: Duration,
    /// Age after which correlation entries are pruned (default: 24 hours)
    pub retention: Duration,
    /// Maximum number of tracked container ids (default: 10000)
    pub max_tracked: usize,
}

impl WatcherConfig {
    pub fn from_settings(settings: &WatcherSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            name_pattern: settings.name_regex()?,
            queue_capacity: settings.queue_capacity.max(1),
            enqueue_timeout: Duration::from_millis(settings.enqueue_timeout_ms),
            retention: Duration::from_secs(settings.retention_secs),
            max_tracked: settings.max_tracked,
        })
    }
}

/// Where and how often running workloads are snapshotted
struct StatsCapture {
    log: Arc<StatsLog>,
    interval: Duration,
}

/// State shared between the subscription loop and event tasks
struct Shared {
    runtime: Arc<dyn ContainerRuntime>,
    state: Mutex<CorrelationState>,
    name_pattern: Regex,
    audit: Arc<AuditLog>,
    records_tx: mpsc::Sender<LifecycleRecord>,
    enqueue_timeout: Duration,
    stats: Option<StatsCapture>,
    /// Flipped to true when the watcher stops; ends stats capture
    stop: watch::Sender<bool>,
    health: Option<HealthRegistry>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

/// Watches the runtime for workload containers and emits lifecycle records
pub struct EventWatcher {
    shared: Shared,
}

impl EventWatcher {
    /// Create a watcher and the receiving end of its record queue
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: WatcherConfig,
        audit: Arc<AuditLog>,
        logger: StructuredLogger,
    ) -> (Self, mpsc::Receiver<LifecycleRecord>) {
        let (records_tx, records_rx) = mpsc::channel(config.queue_capacity);
        let (stop, _) = watch::channel(false);

        let shared = Shared {
            runtime,
            state: Mutex::new(CorrelationState::new(config.retention, config.max_tracked)),
            name_pattern: config.name_pattern,
            audit,
            records_tx,
            enqueue_timeout: config.enqueue_timeout,
            stats: None,
            stop,
            health: None,
            metrics: MonitorMetrics::new(),
            logger,
        };

        (Self { shared }, records_rx)
    }

    /// Snapshot runtime stats of every captured workload into `log`
    pub fn with_stats(mut self, log: Arc<StatsLog>, interval: Duration) -> Self {
        self.shared.stats = Some(StatsCapture { log, interval });
        self
    }

    /// Report the feed subscription and stream errors to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.shared.health = Some(health);
        self
    }

    /// Run until shutdown or until the event feed ends
    ///
    /// In-flight event tasks are awaited before returning; the record
    /// queue closes once the watcher is dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let shared = Arc::new(self.shared);
        info!(
            pattern = %shared.name_pattern,
            queue_capacity = shared.records_tx.max_capacity(),
            stats_capture = shared.stats.is_some(),
            "Starting event watcher"
        );

        let mut events = shared.runtime.events();
        let mut tasks = JoinSet::new();
        let mut stream_failing = false;
        shared.set_subscribed(true).await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Event watcher received shutdown signal");
                    break;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        shared.metrics.inc_events_received(event.action.as_str());
                        if let Some(health) = &shared.health {
                            health.note_event().await;
                            if stream_failing {
                                health.set_healthy(components::WATCHER).await;
                            }
                        }
                        stream_failing = false;

                        let task_shared = shared.clone();
                        tasks.spawn(async move { task_shared.handle(event).await });
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Runtime event stream error");
                        stream_failing = true;
                        if let Some(health) = &shared.health {
                            health.set_degraded(components::WATCHER, e.to_string()).await;
                        }
                    }
                    None => {
                        warn!("Runtime event stream ended");
                        if let Some(health) = &shared.health {
                            health
                                .set_unhealthy(components::WATCHER, "Runtime event stream ended")
                                .await;
                        }
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Event task failed");
                    }
                }
            }
        }

        shared.set_subscribed(false).await;

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Event task failed");
            }
        }
        shared.stop.send_replace(true);

        info!("Event watcher stopped");
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, CorrelationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn set_subscribed(&self, subscribed: bool) {
        if let Some(health) = &self.health {
            health.set_subscribed(subscribed).await;
        }
    }

    async fn handle(&self, event: RuntimeEvent) {
        match event.action {
            EventAction::Start => self.on_start(&event.actor_id).await,
            EventAction::Die => self.on_die(&event.actor_id).await,
        }
    }

    async fn on_start(&self, id: &str) {
        if !self.state().mark_started(id, Instant::now()) {
            debug!(container_id = %id, "Duplicate start event ignored");
            self.metrics.inc_duplicate_events();
            return;
        }

        let Some(details) = self.inspect_workload(id).await else {
            return;
        };

        // Already exited; the matching die is dropped as orphaned
        if details.pid <= 0 {
            warn!(
                container_id = %id,
                name = %details.display_name(),
                "Workload process already gone at start, PID not found"
            );
            self.metrics.inc_missing_pids();
            return;
        }

        let entry = StartEntry {
            name: details.display_name().to_string(),
            pid: details.pid,
            container_id: id.to_string(),
            work_dir: details.working_dir.clone(),
        };

        let (captured, tracked) = {
            let mut state = self.state();
            let captured = state.record_start(
                id,
                StartInfo {
                    pid: entry.pid,
                    name: entry.name.clone(),
                    work_dir: entry.work_dir.clone(),
                },
                Instant::now(),
            );
            (captured, state.tracked())
        };
        self.metrics.set_tracked_containers(tracked);

        if !captured {
            warn!(
                container_id = %id,
                name = %entry.name,
                "Container died before its start was captured, discarding start"
            );
            return;
        }

        self.logger
            .log_container_started(&entry.name, id, entry.pid, &entry.work_dir);
        self.start_stats_capture(id, &entry.name);

        let audit = self.audit.clone();
        self.write_audit(move || audit.record_started(&entry)).await;
    }

    fn start_stats_capture(&self, id: &str, name: &str) {
        let Some(stats) = &self.stats else {
            return;
        };

        let sampler = StatsSampler {
            runtime: self.runtime.clone(),
            log: stats.log.clone(),
            interval: stats.interval,
            metrics: self.metrics.clone(),
        };
        tokio::spawn(sampler.run(id.to_string(), name.to_string(), self.stop.subscribe()));
    }

    async fn on_die(&self, id: &str) {
        if !self.state().mark_died(id, Instant::now()) {
            debug!(container_id = %id, "Duplicate die event ignored");
            self.metrics.inc_duplicate_events();
            return;
        }

        let Some(details) = self.inspect_workload(id).await else {
            return;
        };

        let (start, tracked) = {
            let mut state = self.state();
            (state.take_start(id), state.tracked())
        };
        self.metrics.set_tracked_containers(tracked);

        let Some(start) = start else {
            warn!(
                container_id = %id,
                name = %details.display_name(),
                "Die event without a captured start, dropping"
            );
            self.metrics.inc_orphaned_dies();
            return;
        };

        let record = match build_record(id, &details, start) {
            Ok(record) => record,
            Err(e) => {
                warn!(container_id = %id, error = %e, "Cannot build lifecycle record, dropping");
                return;
            }
        };

        self.logger.log_container_died(&record);
        self.enqueue(record.clone()).await;

        let audit = self.audit.clone();
        self.write_audit(move || audit.record_died(&record)).await;
    }

    /// Inspect a container; `None` if inspection failed or it is not a workload
    async fn inspect_workload(&self, id: &str) -> Option<ContainerDetails> {
        let details = match self.runtime.inspect(id).await {
            Ok(details) => details,
            Err(e) => {
                warn!(container_id = %id, error = %e, "Container inspection failed, dropping event");
                self.metrics.inc_inspection_errors();
                return None;
            }
        };

        if !self.name_pattern.is_match(&details.name) {
            debug!(container_id = %id, name = %details.name, "Not a workload container");
            return None;
        }

        Some(details)
    }

    async fn enqueue(&self, record: LifecycleRecord) {
        match self.records_tx.send_timeout(record, self.enqueue_timeout).await {
            Ok(()) => self.metrics.inc_records_emitted(),
            Err(SendTimeoutError::Timeout(record)) => {
                warn!(
                    container_id = %record.container_id,
                    name = %record.name,
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    "Lifecycle queue full, dropping record"
                );
                self.metrics.inc_records_dropped();
            }
            Err(SendTimeoutError::Closed(record)) => {
                warn!(container_id = %record.container_id, "Lifecycle queue closed, dropping record");
                self.metrics.inc_records_dropped();
            }
        }
    }

    async fn write_audit<F>(&self, write: F)
    where
        F: FnOnce() -> Result<(), crate::error::OutputError> + Send + 'static,
    {
        match tokio::task::spawn_blocking(write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Failed to write audit entry");
                self.metrics.inc_output_errors();
            }
            Err(e) => error!(error = %e, "Audit task failed"),
        }
    }
}

/// Combine the captured start with die-time metadata
fn build_record(
    id: &str,
    details: &ContainerDetails,
    start: StartInfo,
) -> Result<LifecycleRecord, RuntimeError> {
    let missing = |field| RuntimeError::MissingField {
        container_id: id.to_string(),
        field,
    };

    Ok(LifecycleRecord {
        container_id: id.to_string(),
        name: details.display_name().to_string(),
        work_dir: if details.working_dir.is_empty() {
            start.work_dir
        } else {
            details.working_dir.clone()
        },
        pid: start.pid,
        started_at: details.started_at.ok_or_else(|| missing("started_at"))?,
        died_at: details.finished_at.ok_or_else(|| missing("finished_at"))?,
    })
}
