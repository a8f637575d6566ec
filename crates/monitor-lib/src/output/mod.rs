//! Durable output: per-query result files, lifecycle audit trails and
//! raw stats snapshots

mod audit;
mod sink;
mod stats;
mod writer;

pub use audit::{AuditLog, StartEntry};
pub use sink::CsvSink;
pub use stats::StatsLog;
pub use writer::{header_for, ResultWriter, WriteReport};
