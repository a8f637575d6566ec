//! Container lifecycle watching, start/die correlation and raw stats capture

mod correlation;
mod event_watcher;
mod stats;

pub use correlation::{CorrelationState, StartInfo};
pub use event_watcher::{EventWatcher, WatcherConfig};
