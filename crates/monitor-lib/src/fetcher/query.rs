//! Binding query templates to a container's lifetime

use crate::catalog::{LabelSelector, QuerySpec};
use crate::models::LifecycleRecord;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Time window and resolution of a range query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl QueryRange {
    /// Window covering the container's lifetime plus a trailing margin
    pub fn for_record(record: &LifecycleRecord, margin: Duration, step: Duration) -> Self {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            start: record.started_at,
            end: record.died_at + margin,
            step,
        }
    }
}

/// Substitute the container attribute named by the query's selector
pub fn bind_query(spec: &QuerySpec, record: &LifecycleRecord) -> String {
    let Some(selector) = spec.selector else {
        return spec.query.clone();
    };

    let value = match selector {
        LabelSelector::Name | LabelSelector::ContainerNames | LabelSelector::ContainerName => {
            record.name.clone()
        }
        LabelSelector::Path => record.container_id.clone(),
        LabelSelector::WorkDir => record.work_dir.clone(),
        LabelSelector::GroupName => record.pid.to_string(),
    };

    format!(
        "{}{{{}=\"{}\"}}",
        spec.query,
        selector.label(),
        escape_label_value(&value)
    )
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Target;
    use chrono::TimeZone;

    fn record() -> LifecycleRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        LifecycleRecord {
            container_id: "3f2a".to_string(),
            name: "nxf-abc123".to_string(),
            work_dir: "/work/3f/2a".to_string(),
            pid: 4242,
            started_at: start,
            died_at: start + chrono::Duration::seconds(5),
        }
    }

    fn spec(selector: Option<LabelSelector>) -> QuerySpec {
        QuerySpec {
            target: Target::Cpu,
            data_source: "docker".to_string(),
            name: "cpu_usage".to_string(),
            query: "container_cpu".to_string(),
            selector,
            labels: vec!["name".to_string()],
            unit: "%".to_string(),
        }
    }

    #[test]
    fn test_bind_by_identifier() {
        let record = record();
        assert_eq!(
            bind_query(&spec(Some(LabelSelector::Name)), &record),
            r#"container_cpu{name="nxf-abc123"}"#
        );
        assert_eq!(
            bind_query(&spec(Some(LabelSelector::Path)), &record),
            r#"container_cpu{path="3f2a"}"#
        );
        assert_eq!(
            bind_query(&spec(Some(LabelSelector::WorkDir)), &record),
            r#"container_cpu{work_dir="/work/3f/2a"}"#
        );
        assert_eq!(
            bind_query(&spec(Some(LabelSelector::GroupName)), &record),
            r#"container_cpu{groupname="4242"}"#
        );
        assert_eq!(
            bind_query(&spec(Some(LabelSelector::ContainerNames)), &record),
            r#"container_cpu{container_names="nxf-abc123"}"#
        );
    }

    #[test]
    fn test_unbound_query_used_verbatim() {
        assert_eq!(bind_query(&spec(None), &record()), "container_cpu");
    }

    #[test]
    fn test_label_value_escaped() {
        let mut record = record();
        record.work_dir = r#"C:\work "x""#.to_string();
        assert_eq!(
            bind_query(&spec(Some(LabelSelector::WorkDir)), &record),
            r#"container_cpu{work_dir="C:\\work \"x\""}"#
        );
    }

    #[test]
    fn test_range_adds_trailing_margin() {
        let record = record();
        let range =
            QueryRange::for_record(&record, Duration::from_secs(5), Duration::from_millis(500));
        assert_eq!(range.start, record.started_at);
        assert_eq!(range.end, record.started_at + chrono::Duration::seconds(10));
        assert_eq!(range.step, Duration::from_millis(500));
    }
}
