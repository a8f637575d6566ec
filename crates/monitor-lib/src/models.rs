//! Core data models for the task monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Raw event from the container runtime feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub action: EventAction,
    pub actor_id: String,
}

/// Event actions the watcher reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    Start,
    Die,
}

impl EventAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "start" => Some(EventAction::Start),
            "die" => Some(EventAction::Die),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Start => "start",
            EventAction::Die => "die",
        }
    }
}

/// Container metadata returned by an inspection call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    /// Name as reported by the runtime, including the leading `/`
    pub name: String,
    /// Host pid of the main process; 0 once the process is gone
    pub pid: i64,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub working_dir: String,
}

impl ContainerDetails {
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix('/').unwrap_or(&self.name)
    }
}

/// Correlated start and die of one workload container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub container_id: String,
    pub name: String,
    pub work_dir: String,
    /// Captured from the start event, never re-read at die time
    pub pid: i64,
    pub started_at: DateTime<Utc>,
    pub died_at: DateTime<Utc>,
}

impl LifecycleRecord {
    pub fn lifetime(&self) -> Duration {
        (self.died_at - self.started_at).to_std().unwrap_or_default()
    }
}

/// One sample of a time series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A labelled time series as returned by a range query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

impl Series {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_action_parse() {
        assert_eq!(EventAction::parse("start"), Some(EventAction::Start));
        assert_eq!(EventAction::parse("die"), Some(EventAction::Die));
        assert_eq!(EventAction::parse("exec_start: sh"), None);
    }

    #[test]
    fn test_display_name_strips_slash() {
        let details = ContainerDetails {
            name: "/nxf-abc123".to_string(),
            ..Default::default()
        };
        assert_eq!(details.display_name(), "nxf-abc123");
    }

    #[test]
    fn test_lifetime() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let record = LifecycleRecord {
            container_id: "abc".to_string(),
            name: "nxf-abc".to_string(),
            work_dir: "/work".to_string(),
            pid: 42,
            started_at: start,
            died_at: start + chrono::Duration::seconds(5),
        };
        assert_eq!(record.lifetime(), Duration::from_secs(5));
    }

    #[test]
    fn test_lifetime_never_negative() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let record = LifecycleRecord {
            container_id: "abc".to_string(),
            name: "nxf-abc".to_string(),
            work_dir: String::new(),
            pid: 1,
            started_at: start,
            died_at: start - chrono::Duration::seconds(1),
        };
        assert_eq!(record.lifetime(), Duration::ZERO);
    }
}
