//! Process configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Settings of the monitor process itself
///
/// Read from `MONITOR_*` environment variables; the monitoring
/// configuration proper lives in the YAML file at `config`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Node name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Path of the monitoring configuration file
    #[serde(default = "default_config_path")]
    pub config: PathBuf,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config.yml")
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            config: default_config_path(),
        }
    }
}

impl ProcessConfig {
    /// Load from the environment, falling back to defaults
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MONITOR").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.config, PathBuf::from("config.yml"));
    }
}
