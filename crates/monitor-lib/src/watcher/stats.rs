//! Raw stats capture for running workload containers

use crate::observability::MonitorMetrics;
use crate::output::StatsLog;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Snapshots one container's stats until it stops running
pub(crate) struct StatsSampler {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub log: Arc<StatsLog>,
    pub interval: Duration,
    pub metrics: MonitorMetrics,
}

impl StatsSampler {
    /// Returns the number of snapshots written
    ///
    /// A snapshot is taken before the running check, so a container that
    /// exits right after starting still leaves one line behind.
    pub async fn run(
        self,
        container_id: String,
        name: String,
        mut stop: watch::Receiver<bool>,
    ) -> usize {
        let mut written = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            let sample = match self.runtime.stats(&container_id).await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Stats snapshot failed, stopping capture");
                    break;
                }
            };

            let log = self.log.clone();
            let file_name = name.clone();
            match tokio::task::spawn_blocking(move || log.append(&file_name, &sample)).await {
                Ok(Ok(())) => {
                    written += 1;
                    self.metrics.inc_stats_samples();
                }
                Ok(Err(e)) => {
                    error!(name = %name, error = %e, "Failed to write stats snapshot");
                    self.metrics.inc_output_errors();
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Stats write task failed");
                    break;
                }
            }

            match self.runtime.inspect(&container_id).await {
                Ok(details) if details.running => {}
                _ => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.changed() => break,
            }
        }

        debug!(container_id = %container_id, name = %name, samples = written, "Stats capture finished");
        written
    }
}
