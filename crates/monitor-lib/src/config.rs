//! Monitoring configuration
//!
//! A YAML file layered with `MONITOR__`-prefixed environment overrides,
//! deserialized once into a typed tree. Monitoring target entries keep
//! their leaf fields optional so that the catalog builder can skip a bad
//! metric without rejecting the whole file.

use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default naming convention of tracked workload containers
pub const DEFAULT_NAME_PATTERN: &str = r"^/nxf-[a-zA-Z0-9-]+$";

/// Root of the monitoring configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub server_configurations: ServerConfigurations,
    #[serde(default)]
    pub monitoring_targets: MonitoringTargets,
    #[serde(default)]
    pub watcher: WatcherSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigurations {
    #[serde(default)]
    pub prometheus: PrometheusSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrometheusSettings {
    #[serde(default)]
    pub target_server: TargetServer,
}

/// Metrics backend connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct TargetServer {
    /// Base URL of the Prometheus-compatible backend
    #[serde(default = "default_address")]
    pub address: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Polling interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
}

impl Default for TargetServer {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout: default_timeout(),
            interval: default_interval(),
        }
    }
}

fn default_address() -> String {
    "http://localhost:9090".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_interval() -> u64 {
    10
}

impl TargetServer {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    /// Parse the backend address
    pub fn url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.address).map_err(|source| ConfigError::BackendAddress {
            address: self.address.clone(),
            source,
        })
    }
}

/// The fixed set of monitoring target categories
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitoringTargets {
    #[serde(default)]
    pub task_metadata: MonitoringTarget,
    #[serde(default)]
    pub cpu: MonitoringTarget,
    #[serde(default)]
    pub memory: MonitoringTarget,
    #[serde(default)]
    pub disk: MonitoringTarget,
    #[serde(default)]
    pub network: MonitoringTarget,
    #[serde(default)]
    pub energy: MonitoringTarget,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitoringTarget {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "metrics", alias = "data_sources")]
    pub data_sources: Vec<DataSourceConfig>,
}

/// One data source of a target, sharing labels and selector across its metrics
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSourceConfig {
    pub source: Option<String>,
    pub identifier: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricConfig {
    pub name: Option<String>,
    pub query: Option<String>,
    pub unit: Option<String>,
}

/// Event watcher settings
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSettings {
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,
    /// Capacity of the lifecycle record queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a ready record may wait for queue space before it is dropped
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Age after which unmatched correlation entries are pruned
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Upper bound on tracked container ids
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
    /// Interval between raw stats snapshots of a running workload; 0 disables
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            name_pattern: default_name_pattern(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            retention_secs: default_retention_secs(),
            max_tracked: default_max_tracked(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

fn default_name_pattern() -> String {
    DEFAULT_NAME_PATTERN.to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_enqueue_timeout_ms() -> u64 {
    5_000
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_tracked() -> usize {
    10_000
}

fn default_stats_interval_ms() -> u64 {
    200
}

impl WatcherSettings {
    pub fn name_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.name_pattern).map_err(|source| ConfigError::NamePattern {
            pattern: self.name_pattern.clone(),
            source,
        })
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_ms > 0).then(|| Duration::from_millis(self.stats_interval_ms))
    }
}

/// Range query shaping
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    /// Trailing margin added after the die timestamp
    #[serde(default = "default_margin_secs")]
    pub margin_secs: u64,
    /// Deadline for the whole batch of one lifecycle record
    #[serde(default = "default_batch_deadline_secs")]
    pub batch_deadline_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            step_ms: default_step_ms(),
            margin_secs: default_margin_secs(),
            batch_deadline_secs: default_batch_deadline_secs(),
        }
    }
}

fn default_step_ms() -> u64 {
    500
}

fn default_margin_secs() -> u64 {
    5
}

fn default_batch_deadline_secs() -> u64 {
    12
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_audit_prefix")]
    pub audit_prefix: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            audit_prefix: default_audit_prefix(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_audit_prefix() -> String {
    "nextflow_containers".to_string()
}

impl MonitorConfig {
    /// Load configuration from a YAML file with environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let source = config::File::new(&path, config::FileFormat::Yaml);
        Self::build(source, &path)
    }

    /// Parse configuration from an in-memory YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let source = config::File::from_str(yaml, config::FileFormat::Yaml);
        Self::build(source, "<inline>")
    }

    fn build<S>(source: S, origin: &str) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let load_err = |source| ConfigError::Load {
            path: origin.to_string(),
            source,
        };

        config::Config::builder()
            .add_source(source)
            .add_source(
                config::Environment::with_prefix("MONITOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_err)?
            .try_deserialize()
            .map_err(load_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server_configurations:
  prometheus:
    target_server:
      address: "http://prometheus:9090"
      interval: 5
monitoring_targets:
  cpu:
    enabled: true
    metrics:
      - source: docker
        identifier: name
        labels: [name, id]
        metrics:
          - name: cpu_usage
            query: container_cpu_usage
            unit: "%"
  energy:
    enabled: false
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = MonitorConfig::from_yaml_str(SAMPLE).unwrap();
        let server = &config.server_configurations.prometheus.target_server;
        assert_eq!(server.address, "http://prometheus:9090");
        assert_eq!(server.interval, 5);
        assert_eq!(server.timeout, 10);

        let cpu = &config.monitoring_targets.cpu;
        assert!(cpu.enabled);
        assert_eq!(cpu.data_sources.len(), 1);
        assert_eq!(cpu.data_sources[0].source.as_deref(), Some("docker"));
        assert_eq!(cpu.data_sources[0].labels, vec!["name", "id"]);
        assert_eq!(
            cpu.data_sources[0].metrics[0].unit.as_deref(),
            Some("%")
        );

        assert!(!config.monitoring_targets.energy.enabled);
        assert!(!config.monitoring_targets.memory.enabled);
    }

    #[test]
    fn test_defaults_applied() {
        let config = MonitorConfig::from_yaml_str("monitoring_targets: {}").unwrap();
        assert_eq!(config.watcher.name_pattern, DEFAULT_NAME_PATTERN);
        assert_eq!(config.fetch.step_ms, 500);
        assert_eq!(config.fetch.margin_secs, 5);
        assert_eq!(config.fetch.batch_deadline_secs, 12);
        assert_eq!(config.output.results_dir, PathBuf::from("results"));
        assert_eq!(
            config.watcher.stats_interval(),
            Some(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_zero_stats_interval_disables_capture() {
        let config =
            MonitorConfig::from_yaml_str("watcher:\n  stats_interval_ms: 0\n").unwrap();
        assert_eq!(config.watcher.stats_interval(), None);
    }

    #[test]
    fn test_default_name_pattern_matches_workload() {
        let regex = WatcherSettings::default().name_regex().unwrap();
        assert!(regex.is_match("/nxf-abc123"));
        assert!(!regex.is_match("/postgres"));
        assert!(!regex.is_match("nxf-abc123"));
    }

    #[test]
    fn test_invalid_name_pattern() {
        let settings = WatcherSettings {
            name_pattern: "([".to_string(),
            ..Default::default()
        };
        assert!(settings.name_regex().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = MonitorConfig::load("/nonexistent/monitor-config.yml");
        assert!(result.is_err());
    }
}
