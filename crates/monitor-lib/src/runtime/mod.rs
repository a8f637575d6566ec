//! Container runtime access
//!
//! The watcher needs a feed of lifecycle events, an out-of-band
//! inspection call and one-shot resource usage snapshots. All of them sit
//! behind [`ContainerRuntime`] so the Docker implementation can be swapped
//! for a scripted one in tests.

mod docker;

pub use docker::DockerRuntime;

use crate::error::RuntimeError;
use crate::models::{ContainerDetails, RuntimeEvent};
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// Stream of start/die events, already filtered to containers
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, RuntimeError>> + Send>>;

/// Trait for container runtime implementations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Subscribe to container start/die events
    fn events(&self) -> EventStream;

    /// Inspect a container's current metadata
    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails, RuntimeError>;

    /// Take a single resource usage snapshot, as the runtime reports it
    async fn stats(&self, container_id: &str) -> Result<serde_json::Value, RuntimeError>;
}
