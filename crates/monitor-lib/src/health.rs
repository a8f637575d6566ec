//! Component health and activity of the task monitor
//!
//! The watcher owns readiness: the monitor is ready only while it holds a
//! live subscription to the runtime event feed. Fetcher and writer degrade
//! while batches come back incomplete. Next to the component states the
//! registry keeps a small activity summary (last event seen, last record
//! processed) that the health endpoint reports as is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still working, but some output went missing
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }
}

/// Summary of the last lifecycle record that went through fetch and write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastRecord {
    pub name: String,
    pub queries: usize,
    /// Failed or abandoned queries
    pub missing: usize,
    pub files_written: usize,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Activity {
    /// Whether the runtime event feed is currently subscribed
    pub subscribed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_record: Option<LastRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub activity: Activity,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const WATCHER: &str = "watcher";
    pub const FETCHER: &str = "fetcher";
    pub const WRITER: &str = "writer";

    pub const ALL: [&str; 3] = [WATCHER, FETCHER, WRITER];
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    activity: Activity,
}

/// Shared handle to the monitor's health state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Keeps `since` when neither status nor message change
    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        match state.components.get(name) {
            Some(current) if current.status == status && current.message == message => {}
            _ => {
                state
                    .components
                    .insert(name.to_string(), ComponentHealth::new(status, message));
            }
        }
    }

    /// Record whether the runtime event feed is subscribed
    pub async fn set_subscribed(&self, subscribed: bool) {
        self.state.write().await.activity.subscribed = subscribed;
    }

    pub async fn note_event(&self) {
        self.state.write().await.activity.last_event_at = Some(Utc::now());
    }

    pub async fn record_processed(&self, record: LastRecord) {
        let mut state = self.state.write().await;
        state.activity.records_processed += 1;
        state.activity.last_record = Some(record);
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
            activity: state.activity.clone(),
        }
    }

    /// Ready while subscribed and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.activity.subscribed {
            Some("Runtime event feed not subscribed".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, health)| health.status == ComponentStatus::Unhealthy)
                .map(|(name, health)| match &health.message {
                    Some(message) => format!("{} unhealthy: {}", name, message),
                    None => format!("{} unhealthy", name),
                })
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
