//! Raw runtime stats snapshots, one JSON document per line

use crate::error::OutputError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends snapshots to `<dir>/<name>.json`
///
/// Each container has a single sampler, so appends to one file are never
/// concurrent and no path lock is needed.
pub struct StatsLog {
    dir: PathBuf,
}

impl StatsLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    pub fn append(&self, name: &str, sample: &serde_json::Value) -> Result<(), OutputError> {
        let path = self.path_for(name);
        fs::create_dir_all(&self.dir).map_err(|source| OutputError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut line = serde_json::to_vec(sample).map_err(|source| OutputError::Encode {
            path: path.clone(),
            source,
        })?;
        line.push(b'\n');

        let mut file = open_append(&path)?;
        file.write_all(&line)
            .map_err(|source| OutputError::Append { path, source })
    }
}

fn open_append(path: &Path) -> Result<fs::File, OutputError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| OutputError::Open {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_append_writes_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = StatsLog::new(temp_dir.path().join("results"));

        log.append("nxf-abc123", &json!({"cpu_stats": {"online_cpus": 4}}))
            .unwrap();
        log.append("nxf-abc123", &json!({"cpu_stats": {"online_cpus": 2}}))
            .unwrap();

        let content = fs::read_to_string(log.path_for("nxf-abc123")).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["cpu_stats"]["online_cpus"], 2);
    }
}
