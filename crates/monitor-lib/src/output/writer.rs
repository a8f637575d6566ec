//! Flattening fetch results into per-query CSV files

use super::sink::CsvSink;
use crate::catalog::{QueryCatalog, QuerySpec, Target};
use crate::fetcher::FetchResult;
use crate::models::Series;
use crate::observability::MonitorMetrics;
use chrono::SecondsFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Counters for one flushed fetch result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub files_written: usize,
    pub rows_written: usize,
    pub failed: usize,
}

/// Writes `<root>/<target>/<source>/<name>/<name>.csv`
pub struct ResultWriter {
    root: PathBuf,
    sink: Arc<CsvSink>,
    metrics: MonitorMetrics,
}

impl ResultWriter {
    pub fn new(root: impl Into<PathBuf>, sink: Arc<CsvSink>) -> Self {
        Self {
            root: root.into(),
            sink,
            metrics: MonitorMetrics::new(),
        }
    }

    pub fn path_for(&self, target: Target, data_source: &str, name: &str) -> PathBuf {
        self.root
            .join(target.as_str())
            .join(data_source)
            .join(name)
            .join(format!("{}.csv", name))
    }

    /// Append every triple of `result`; a failing triple is logged and skipped
    pub fn write(&self, catalog: &QueryCatalog, result: &FetchResult) -> WriteReport {
        let mut report = WriteReport::default();

        for (target, data_source, name, series) in result.iter() {
            let Some(spec) = catalog.spec(target, data_source, name) else {
                warn!(
                    monitoring_target = %target,
                    source = %data_source,
                    name = %name,
                    "Result has no catalog entry, skipping"
                );
                report.failed += 1;
                continue;
            };

            let path = self.path_for(target, data_source, name);
            let rows = series.iter().flat_map(|s| rows_for(spec, s));

            match self.sink.append(&path, &header_for(spec), rows) {
                Ok(rows) => {
                    debug!(path = %path.display(), rows = rows, "Wrote query result");
                    self.metrics.inc_rows_written(rows);
                    report.files_written += 1;
                    report.rows_written += rows;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to write query result");
                    self.metrics.inc_output_errors();
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// `timestamp`, `value (<unit>)`, then the configured labels in order
pub fn header_for(spec: &QuerySpec) -> Vec<String> {
    let value = if spec.unit.is_empty() {
        "value".to_string()
    } else {
        format!("value ({})", spec.unit)
    };

    ["timestamp".to_string(), value]
        .into_iter()
        .chain(spec.labels.iter().cloned())
        .collect()
}

fn rows_for<'a>(spec: &'a QuerySpec, series: &'a Series) -> impl Iterator<Item = Vec<String>> + 'a {
    series.samples.iter().map(move |sample| {
        let mut row = Vec::with_capacity(spec.labels.len() + 2);
        row.push(sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
        row.push(format!("{:.6}", sample.value));
        row.extend(
            spec.labels
                .iter()
                .map(|label| series.label(label).unwrap_or_default().to_string()),
        );
        row
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LabelSelector;
    use crate::models::Sample;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn spec(unit: &str, labels: &[&str]) -> QuerySpec {
        QuerySpec {
            target: Target::Cpu,
            data_source: "docker".to_string(),
            name: "cpu_usage".to_string(),
            query: "cpu".to_string(),
            selector: Some(LabelSelector::Name),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            unit: unit.to_string(),
        }
    }

    fn series(labels: &[(&str, &str)], values: &[f64]) -> Series {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        Series {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            samples: values
                .iter()
                .enumerate()
                .map(|(i, value)| Sample {
                    timestamp: t0 + chrono::Duration::milliseconds(500 * i as i64),
                    value: *value,
                })
                .collect(),
        }
    }

    fn catalog_with(spec: QuerySpec) -> QueryCatalog {
        let yaml = format!(
            r#"
monitoring_targets:
  cpu:
    enabled: true
    metrics:
      - source: {}
        identifier: name
        labels: [{}]
        metrics:
          - {{ name: {}, query: {}, unit: "{}" }}
"#,
            spec.data_source,
            spec.labels.join(", "),
            spec.name,
            spec.query,
            spec.unit
        );
        let config = crate::config::MonitorConfig::from_yaml_str(&yaml).unwrap();
        QueryCatalog::build(&config.monitoring_targets)
    }

    #[test]
    fn test_header_with_unit_and_labels() {
        assert_eq!(
            header_for(&spec("%", &["name", "id"])),
            vec!["timestamp", "value (%)", "name", "id"]
        );
        assert_eq!(header_for(&spec("", &[])), vec!["timestamp", "value"]);
    }

    #[test]
    fn test_rows_project_configured_labels() {
        let spec = spec("%", &["name", "missing"]);
        let series = series(&[("name", "nxf-a"), ("extra", "x")], &[1.5]);

        let rows: Vec<_> = rows_for(&spec, &series).collect();
        assert_eq!(
            rows,
            vec![vec![
                "2024-01-01T12:00:00.000Z".to_string(),
                "1.500000".to_string(),
                "nxf-a".to_string(),
                String::new(),
            ]]
        );
    }

    #[test]
    fn test_write_creates_layout_and_appends() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(temp_dir.path(), Arc::new(CsvSink::new()));
        let catalog = catalog_with(spec("%", &["name"]));

        let mut result = FetchResult::new();
        result.insert(Target::Cpu, "docker", "cpu_usage", vec![series(&[("name", "nxf-a")], &[1.0, 2.0])]);

        let report = writer.write(&catalog, &result);
        assert_eq!(report, WriteReport { files_written: 1, rows_written: 2, failed: 0 });

        let report = writer.write(&catalog, &result);
        assert_eq!(report.rows_written, 2);

        let path = temp_dir.path().join("cpu/docker/cpu_usage/cpu_usage.csv");
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "timestamp,value (%),name");
        assert_eq!(lines[1], "2024-01-01T12:00:00.000Z,1.000000,nxf-a");
        assert!(lines.iter().all(|l| l.split(',').count() == 3));
    }

    #[test]
    fn test_empty_series_still_writes_header() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(temp_dir.path(), Arc::new(CsvSink::new()));
        let catalog = catalog_with(spec("", &["name"]));

        let mut result = FetchResult::new();
        result.insert(Target::Cpu, "docker", "cpu_usage", Vec::new());

        let report = writer.write(&catalog, &result);
        assert_eq!(report.files_written, 1);
        assert_eq!(report.rows_written, 0);
        let content =
            fs::read_to_string(temp_dir.path().join("cpu/docker/cpu_usage/cpu_usage.csv")).unwrap();
        assert_eq!(content, "timestamp,value,name\n");
    }

    #[test]
    fn test_failed_triple_does_not_stop_others() {
        let temp_dir = TempDir::new().unwrap();
        // A file where the `cpu` directory should be blocks that target only
        fs::write(temp_dir.path().join("cpu"), "").unwrap();
        let writer = ResultWriter::new(temp_dir.path(), Arc::new(CsvSink::new()));

        let config = crate::config::MonitorConfig::from_yaml_str(
            r#"
monitoring_targets:
  cpu:
    enabled: true
    metrics:
      - source: docker
        identifier: name
        metrics:
          - { name: cpu_usage, query: cpu, unit: "%" }
  memory:
    enabled: true
    metrics:
      - source: docker
        identifier: name
        metrics:
          - { name: rss, query: rss, unit: B }
"#,
        )
        .unwrap();
        let catalog = QueryCatalog::build(&config.monitoring_targets);

        let mut result = FetchResult::new();
        result.insert(Target::Cpu, "docker", "cpu_usage", vec![series(&[], &[1.0])]);
        result.insert(Target::Memory, "docker", "rss", vec![series(&[], &[2.0])]);

        let report = writer.write(&catalog, &result);
        assert_eq!(report.failed, 1);
        assert_eq!(report.files_written, 1);
        assert!(temp_dir.path().join("memory/docker/rss/rss.csv").exists());
    }
}
