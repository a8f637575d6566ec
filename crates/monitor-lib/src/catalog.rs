//! Query catalog built from the monitoring configuration
//!
//! The catalog is a pure function of [`MonitoringTargets`]: one
//! [`QuerySpec`] per valid metric, grouped by target and data source.
//! Invalid entries are skipped with a warning, never failing the build.
//! Once built it is shared read-only behind an `Arc`.

use crate::config::{DataSourceConfig, MonitoringTarget, MonitoringTargets};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Monitoring target categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    TaskMetadata,
    Cpu,
    Memory,
    Disk,
    Network,
    Energy,
}

impl Target {
    pub const ALL: [Target; 6] = [
        Target::TaskMetadata,
        Target::Cpu,
        Target::Memory,
        Target::Disk,
        Target::Network,
        Target::Energy,
    ];

    /// Directory and log name of the target
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::TaskMetadata => "task_metadata",
            Target::Cpu => "cpu",
            Target::Memory => "memory",
            Target::Disk => "disk",
            Target::Network => "network",
            Target::Energy => "energy",
        }
    }

    fn config<'a>(&self, targets: &'a MonitoringTargets) -> &'a MonitoringTarget {
        match self {
            Target::TaskMetadata => &targets.task_metadata,
            Target::Cpu => &targets.cpu,
            Target::Memory => &targets.memory,
            Target::Disk => &targets.disk,
            Target::Network => &targets.network,
            Target::Energy => &targets.energy,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which container attribute a query is scoped by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSelector {
    /// `name`: container name
    Name,
    /// `path`: container id
    Path,
    /// `work_dir`: container working directory
    WorkDir,
    /// `groupname`: process id captured at start
    GroupName,
    /// `container_names`: container name
    ContainerNames,
    /// `container_name`: container name
    ContainerName,
}

impl LabelSelector {
    pub fn parse(identifier: &str) -> Option<Self> {
        match identifier {
            "name" => Some(LabelSelector::Name),
            "path" => Some(LabelSelector::Path),
            "work_dir" => Some(LabelSelector::WorkDir),
            "groupname" => Some(LabelSelector::GroupName),
            "container_names" => Some(LabelSelector::ContainerNames),
            "container_name" => Some(LabelSelector::ContainerName),
            _ => None,
        }
    }

    /// Label name used in the bound selector
    pub fn label(&self) -> &'static str {
        match self {
            LabelSelector::Name => "name",
            LabelSelector::Path => "path",
            LabelSelector::WorkDir => "work_dir",
            LabelSelector::GroupName => "groupname",
            LabelSelector::ContainerNames => "container_names",
            LabelSelector::ContainerName => "container_name",
        }
    }
}

/// One query of the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub target: Target,
    pub data_source: String,
    pub name: String,
    /// Raw query template, bound per container by the fetcher
    pub query: String,
    /// `None` leaves the query unbound
    pub selector: Option<LabelSelector>,
    /// Label names projected into output columns, in declared order
    pub labels: Vec<String>,
    pub unit: String,
}

/// target -> data source -> ordered queries
pub type SourceMap = BTreeMap<String, Vec<QuerySpec>>;

/// Immutable set of queries derived from configuration
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    targets: BTreeMap<Target, SourceMap>,
}

impl QueryCatalog {
    /// Build the catalog, skipping invalid entries
    pub fn build(config: &MonitoringTargets) -> Self {
        let mut targets = BTreeMap::new();

        for target in Target::ALL {
            let target_config = target.config(config);
            let mut sources = SourceMap::new();

            if target_config.enabled {
                if target_config.data_sources.is_empty() {
                    warn!(monitoring_target = %target, "Target is enabled but declares no data sources");
                }
                for source_config in &target_config.data_sources {
                    Self::add_source(target, source_config, &mut sources);
                }
            } else {
                debug!(monitoring_target = %target, "Target disabled");
            }

            targets.insert(target, sources);
        }

        let catalog = Self { targets };
        debug!(queries = catalog.len(), "Query catalog built");
        catalog
    }

    fn add_source(target: Target, source_config: &DataSourceConfig, sources: &mut SourceMap) {
        let Some(source) = non_empty(source_config.source.as_deref()) else {
            warn!(monitoring_target = %target, "Skipping data source without a name");
            return;
        };

        let selector = match non_empty(source_config.identifier.as_deref()) {
            Some(identifier) => {
                let selector = LabelSelector::parse(identifier);
                if selector.is_none() {
                    warn!(
                        monitoring_target = %target,
                        source = %source,
                        identifier = %identifier,
                        "Unknown identifier, queries of this source stay unbound"
                    );
                }
                selector
            }
            None => {
                warn!(monitoring_target = %target, source = %source, "Data source has no identifier, queries stay unbound");
                None
            }
        };

        let specs = sources.entry(source.to_string()).or_default();

        for metric in &source_config.metrics {
            let (Some(name), Some(query), Some(unit)) = (
                non_empty(metric.name.as_deref()),
                non_empty(metric.query.as_deref()),
                metric.unit.as_deref(),
            ) else {
                warn!(
                    monitoring_target = %target,
                    source = %source,
                    metric = ?metric.name,
                    "Skipping metric missing name, query or unit"
                );
                continue;
            };

            if specs.iter().any(|spec| spec.name == name) {
                warn!(monitoring_target = %target, source = %source, metric = %name, "Skipping duplicate metric name");
                continue;
            }

            specs.push(QuerySpec {
                target,
                data_source: source.to_string(),
                name: name.to_string(),
                query: strip_escapes(query),
                selector,
                labels: source_config.labels.clone(),
                unit: unit.trim().to_string(),
            });
        }
    }

    /// Data sources of a target; disabled targets yield an empty map
    pub fn target(&self, target: Target) -> Option<&SourceMap> {
        self.targets.get(&target)
    }

    /// Look up one query by its coordinates
    pub fn spec(&self, target: Target, data_source: &str, name: &str) -> Option<&QuerySpec> {
        self.targets
            .get(&target)?
            .get(data_source)?
            .iter()
            .find(|spec| spec.name == name)
    }

    /// All queries in catalog order
    pub fn specs(&self) -> impl Iterator<Item = &QuerySpec> {
        self.targets
            .values()
            .flat_map(|sources| sources.values())
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.specs().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Drop backslashes left over from YAML escaping
fn strip_escapes(query: &str) -> String {
    query.replace('\\', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    fn catalog_from(yaml: &str) -> QueryCatalog {
        let config = MonitorConfig::from_yaml_str(yaml).unwrap();
        QueryCatalog::build(&config.monitoring_targets)
    }

    #[test]
    fn test_build_groups_by_target_and_source() {
        let catalog = catalog_from(
            r#"
monitoring_targets:
  cpu:
    enabled: true
    metrics:
      - source: docker
        identifier: name
        labels: [name]
        metrics:
          - { name: cpu_usage, query: rate_cpu, unit: "%" }
          - { name: cpu_throttle, query: throttle, unit: "" }
  memory:
    enabled: true
    metrics:
      - source: cadvisor
        identifier: path
        labels: [id, name]
        metrics:
          - { name: rss, query: container_memory_rss, unit: bytes }
"#,
        );

        assert_eq!(catalog.len(), 3);
        let cpu = catalog.target(Target::Cpu).unwrap();
        let docker = &cpu["docker"];
        assert_eq!(docker.len(), 2);
        assert_eq!(docker[0].name, "cpu_usage");
        assert_eq!(docker[1].name, "cpu_throttle");
        assert_eq!(docker[0].selector, Some(LabelSelector::Name));

        let rss = catalog.spec(Target::Memory, "cadvisor", "rss").unwrap();
        assert_eq!(rss.labels, vec!["id", "name"]);
        assert_eq!(rss.unit, "bytes");
        assert_eq!(rss.selector, Some(LabelSelector::Path));
    }

    #[test]
    fn test_disabled_target_contributes_empty_entry() {
        let catalog = catalog_from(
            r#"
monitoring_targets:
  energy:
    enabled: false
    metrics:
      - source: scaphandre
        identifier: name
        metrics:
          - { name: power, query: scaph_process_power, unit: W }
"#,
        );

        let energy = catalog.target(Target::Energy).unwrap();
        assert!(energy.is_empty());
        assert!(catalog.specs().all(|spec| spec.target != Target::Energy));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let catalog = catalog_from(
            r#"
monitoring_targets:
  disk:
    enabled: true
    metrics:
      - identifier: name
        metrics:
          - { name: orphan, query: q, unit: B }
      - source: node
        identifier: name
        labels: [device]
        metrics:
          - { query: no_name, unit: B }
          - { name: no_query, unit: B }
          - { name: no_unit, query: q }
          - { name: reads, query: disk_reads, unit: B }
          - { name: reads, query: disk_reads_again, unit: B }
"#,
        );

        assert_eq!(catalog.len(), 1);
        let reads = catalog.spec(Target::Disk, "node", "reads").unwrap();
        assert_eq!(reads.query, "disk_reads");
    }

    #[test]
    fn test_unknown_identifier_leaves_query_unbound() {
        let catalog = catalog_from(
            r#"
monitoring_targets:
  network:
    enabled: true
    metrics:
      - source: ebpf
        identifier: hostname
        metrics:
          - { name: rx, query: net_rx, unit: B }
"#,
        );

        let rx = catalog.spec(Target::Network, "ebpf", "rx").unwrap();
        assert_eq!(rx.selector, None);
    }

    #[test]
    fn test_query_escapes_stripped() {
        let catalog = catalog_from(
            r#"
monitoring_targets:
  task_metadata:
    enabled: true
    metrics:
      - source: slurm
        identifier: groupname
        metrics:
          - { name: job, query: 'slurm_job_id\', unit: "" }
"#,
        );

        let job = catalog.spec(Target::TaskMetadata, "slurm", "job").unwrap();
        assert_eq!(job.query, "slurm_job_id");
        assert_eq!(job.selector, Some(LabelSelector::GroupName));
    }

    #[test]
    fn test_every_target_has_an_entry() {
        let catalog = QueryCatalog::build(&MonitoringTargets::default());
        for target in Target::ALL {
            assert!(catalog.target(target).is_some());
        }
    }
}
