//! Append-only CSV files with a header written exactly once
//!
//! Every append to a given path is serialized through a per-path lock so
//! rows from concurrent writers never interleave.

use crate::error::OutputError;
use dashmap::DashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Shared CSV appender
#[derive(Default)]
pub struct CsvSink {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl CsvSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to `path`, writing `header` first if the file is empty
    ///
    /// Parent directories are created if missing. Returns the number of
    /// data rows written.
    pub fn append<I>(&self, path: &Path, header: &[String], rows: I) -> Result<usize, OutputError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| OutputError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let lock = self.lock_for(path);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| OutputError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let is_empty = file
            .metadata()
            .map_err(|source| OutputError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len()
            == 0;

        let write_err = |source| OutputError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = csv::Writer::from_writer(file);
        if is_empty {
            debug!(path = %path.display(), "Writing CSV header");
            writer.write_record(header).map_err(write_err)?;
        }

        let mut written = 0;
        for row in rows {
            writer.write_record(&row).map_err(write_err)?;
            written += 1;
        }

        writer.flush().map_err(|source| OutputError::Flush {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(written)
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn header(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_header_written_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a/b/out.csv");
        let sink = CsvSink::new();
        let header = header(&["timestamp", "value"]);

        sink.append(&path, &header, vec![vec!["t1".into(), "1".into()]])
            .unwrap();
        sink.append(&path, &header, vec![vec!["t2".into(), "2".into()]])
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "timestamp,value\nt1,1\nt2,2\n");
    }

    #[test]
    fn test_header_written_for_empty_batch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.csv");
        let sink = CsvSink::new();

        let written = sink
            .append(&path, &header(&["Name", "PID"]), Vec::new())
            .unwrap();

        assert_eq!(written, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "Name,PID\n");
    }

    #[test]
    fn test_values_are_quoted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("quoted.csv");
        let sink = CsvSink::new();

        sink.append(
            &path,
            &header(&["a"]),
            vec![vec!["has,comma".to_string()]],
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\n\"has,comma\"\n");
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.csv");
        let sink = Arc::new(CsvSink::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = sink.clone();
                let path = path.clone();
                thread::spawn(move || {
                    let rows = (0..50).map(|j| vec![format!("w{}", i), format!("{}", j)]);
                    sink.append(&path, &header(&["writer", "row"]), rows).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 1 + 8 * 50);
        assert_eq!(lines[0], "writer,row");
        assert_eq!(lines.iter().filter(|l| **l == "writer,row").count(), 1);
        assert!(lines[1..].iter().all(|l| l.split(',').count() == 2));
    }

    #[test]
    fn test_unwritable_directory_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let sink = CsvSink::new();
        let result = sink.append(&blocker.join("out.csv"), &header(&["a"]), Vec::new());

        assert!(matches!(result, Err(OutputError::CreateDir { .. })));
    }
}
