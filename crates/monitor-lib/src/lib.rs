//! Task monitor library
//!
//! Watches short-lived workload containers, fetches the metrics each one
//! produced over its exact lifetime, and writes them out as per-query
//! CSV datasets:
//! - Query catalog built from typed configuration
//! - Event watcher with start/die deduplication and correlation
//! - Concurrent, deadline-bounded range-query fetcher
//! - Schema-stable CSV writer and audit trails
//! - Health checks and observability

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod models;
pub mod observability;
pub mod output;
pub mod pipeline;
pub mod runtime;
pub mod watcher;

pub use catalog::{QueryCatalog, QuerySpec, Target};
pub use config::MonitorConfig;
pub use health::{
    Activity, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, LastRecord,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use pipeline::Pipeline;
