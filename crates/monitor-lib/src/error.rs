//! Error taxonomy for the monitoring pipeline
//!
//! None of these abort the pipeline once it is running. Each one scopes
//! the damage to a single config entry, event, query triple or output file.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration could not be loaded or deserialized
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: config::ConfigError,
    },

    #[error("invalid workload name pattern {pattern:?}: {source}")]
    NamePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid metrics backend address {address:?}: {source}")]
    BackendAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },
}

/// Failure talking to the container runtime (event feed or inspection)
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Connect(String),

    #[error("event stream error: {0}")]
    Stream(String),

    #[error("failed to inspect container {container_id}: {reason}")]
    Inspect { container_id: String, reason: String },

    #[error("failed to read stats of container {container_id}: {reason}")]
    Stats { container_id: String, reason: String },

    #[error("container {container_id} is missing {field}")]
    MissingField {
        container_id: String,
        field: &'static str,
    },
}

/// Failure of a single range query triple
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("request to metrics backend failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics backend returned {error_type}: {message}")]
    Backend { error_type: String, message: String },

    #[error("unexpected result type {0:?}, expected matrix")]
    UnexpectedResultType(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Failure materializing results on disk
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to flush {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode stats sample for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to append to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
