//! Start and die audit trails of workload containers

use super::sink::CsvSink;
use crate::error::OutputError;
use crate::models::LifecycleRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STARTED_HEADER: [&str; 4] = ["Name", "PID", "ContainerID", "WorkDir"];
const DIED_HEADER: [&str; 5] = ["Name", "PID", "ContainerID", "WorkDir", "LifeTime"];

/// Audit entry for a started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartEntry {
    pub name: String,
    pub pid: i64,
    pub container_id: String,
    pub work_dir: String,
}

/// Appends to `started_<prefix>.csv` and `died_<prefix>.csv`
pub struct AuditLog {
    started_path: PathBuf,
    died_path: PathBuf,
    sink: Arc<CsvSink>,
}

impl AuditLog {
    pub fn new(dir: &Path, prefix: &str, sink: Arc<CsvSink>) -> Self {
        Self {
            started_path: dir.join(format!("started_{}.csv", prefix)),
            died_path: dir.join(format!("died_{}.csv", prefix)),
            sink,
        }
    }

    pub fn started_path(&self) -> &Path {
        &self.started_path
    }

    pub fn died_path(&self) -> &Path {
        &self.died_path
    }

    pub fn record_started(&self, entry: &StartEntry) -> Result<(), OutputError> {
        let row = vec![
            entry.name.clone(),
            entry.pid.to_string(),
            entry.container_id.clone(),
            entry.work_dir.clone(),
        ];
        self.sink
            .append(&self.started_path, &header(&STARTED_HEADER), [row])?;
        Ok(())
    }

    pub fn record_died(&self, record: &LifecycleRecord) -> Result<(), OutputError> {
        let row = vec![
            record.name.clone(),
            record.pid.to_string(),
            record.container_id.clone(),
            record.work_dir.clone(),
            format!("{:?}", record.lifetime()),
        ];
        self.sink.append(&self.died_path, &header(&DIED_HEADER), [row])?;
        Ok(())
    }
}

fn header(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}
