//! Docker Engine runtime backed by bollard

use super::{ContainerRuntime, EventStream};
use crate::error::RuntimeError;
use crate::models::{ContainerDetails, EventAction, RuntimeEvent};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, StatsOptions};
use bollard::models::{ContainerInspectResponse, EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio_stream::StreamExt;
use tracing::info;

/// Container runtime talking to the local Docker daemon
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Connect(e.to_string()))
    }

    fn events(&self) -> EventStream {
        let options = EventsOptions::<String> {
            filters: HashMap::from([("type".to_string(), vec!["container".to_string()])]),
            ..Default::default()
        };

        let stream = self
            .docker
            .events(Some(options))
            .filter_map(|message| match message {
                Ok(message) => to_runtime_event(message).map(Ok),
                Err(e) => Some(Err(RuntimeError::Stream(e.to_string()))),
            });

        Box::pin(stream)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerDetails, RuntimeError> {
        let response = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Inspect {
                container_id: container_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(to_details(container_id, response))
    }

    async fn stats(&self, container_id: &str) -> Result<serde_json::Value, RuntimeError> {
        let stats_err = |reason: String| RuntimeError::Stats {
            container_id: container_id.to_string(),
            reason,
        };

        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = Box::pin(self.docker.stats(container_id, Some(options)));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| stats_err("empty stats response".to_string()))?
            .map_err(|e| stats_err(e.to_string()))?;

        serde_json::to_value(stats).map_err(|e| stats_err(e.to_string()))
    }
}

/// Keep container start/die events, drop everything else
fn to_runtime_event(message: EventMessage) -> Option<RuntimeEvent> {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }
    let action = EventAction::parse(message.action.as_deref()?)?;
    let actor_id = message.actor?.id?;
    Some(RuntimeEvent { action, actor_id })
}

fn to_details(container_id: &str, response: ContainerInspectResponse) -> ContainerDetails {
    let state = response.state.unwrap_or_default();
    ContainerDetails {
        id: response.id.unwrap_or_else(|| container_id.to_string()),
        name: response.name.unwrap_or_default(),
        pid: state.pid.unwrap_or_default(),
        running: state.running.unwrap_or(false),
        started_at: parse_timestamp(state.started_at.as_deref()),
        finished_at: parse_timestamp(state.finished_at.as_deref()),
        working_dir: response
            .config
            .and_then(|config| config.working_dir)
            .unwrap_or_default(),
    }
}

/// Parse an RFC 3339 timestamp; Docker's zero time counts as absent
fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value?).ok()?.with_timezone(&Utc);
    (parsed.timestamp() > 0).then_some(parsed)
}
