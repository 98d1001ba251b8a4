//! Kubernetes side of the watchdog: pod snapshots and the API collaborator.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1 as corev1;
use kube::api::{Api, DeleteParams, ListParams, PropagationPolicy};
use kube::config::KubeConfigOptions;
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{OrchestratorError, StartupError};

/// Identity of a pod: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub namespace: String,
    pub name: String,
}

impl EntityId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    /// Parse the phase string reported by the API server.
    ///
    /// Anything unrecognized is `Unknown`, which is never treated as stuck.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    /// Terminal or unobservable phases are never inspected further.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Unknown)
    }
}

/// State of a single container at poll time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Waiting { reason: Option<String> },
    Running { started_at: Option<DateTime<Utc>> },
    Terminated,
}

/// One container of a pod snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub name: String,
    pub state: ContainerState,
    pub ready: bool,
}

impl From<&corev1::ContainerStatus> for ContainerSnapshot {
    fn from(status: &corev1::ContainerStatus) -> Self {
        let state = match status.state.as_ref() {
            Some(corev1::ContainerState {
                waiting: Some(waiting),
                ..
            }) => ContainerState::Waiting {
                reason: waiting.reason.clone(),
            },
            Some(corev1::ContainerState {
                running: Some(running),
                ..
            }) => ContainerState::Running {
                started_at: running.started_at.as_ref().map(|t| t.0),
            },
            Some(corev1::ContainerState {
                terminated: Some(_),
                ..
            }) => ContainerState::Terminated,
            // The kubelet reports a container with no state as waiting.
            _ => ContainerState::Waiting { reason: None },
        };

        Self {
            name: status.name.clone(),
            state,
            ready: status.ready,
        }
    }
}

/// Read-only view of one pod, rebuilt from scratch every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub phase: Phase,
    pub created_at: Option<DateTime<Utc>>,
    pub containers: Vec<ContainerSnapshot>,
}

impl EntitySnapshot {
    /// Build a snapshot from a pod returned by the API server.
    ///
    /// `namespace` is used when the object carries no namespace of its own.
    pub fn from_pod(pod: &corev1::Pod, namespace: &str) -> Self {
        let meta = &pod.metadata;
        let status = pod.status.as_ref();

        let phase = status
            .and_then(|s| s.phase.as_deref())
            .map_or(Phase::Pending, Phase::parse);

        let containers = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(ContainerSnapshot::from).collect())
            .unwrap_or_default();

        Self {
            id: EntityId::new(
                meta.namespace.as_deref().unwrap_or(namespace),
                meta.name.clone().unwrap_or_default(),
            ),
            phase,
            created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
            containers,
        }
    }
}

/// How dependents of a deleted object are cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Foreground,
    Background,
    Orphan,
}

impl From<Propagation> for PropagationPolicy {
    fn from(propagation: Propagation) -> Self {
        match propagation {
            Propagation::Foreground => Self::Foreground,
            Propagation::Background => Self::Background,
            Propagation::Orphan => Self::Orphan,
        }
    }
}

/// Parameters of a pod deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    pub grace_period_seconds: u32,
    pub propagation: Propagation,
}

impl DeleteOptions {
    /// Immediate deletion that waits for dependents, leaving recreation to the
    /// owning controller.
    pub const fn force_foreground() -> Self {
        Self {
            grace_period_seconds: 0,
            propagation: Propagation::Foreground,
        }
    }
}

/// The orchestrator API as seen by the watchdog.
///
/// Callers bound each call with their own deadline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// List pods in `namespace`. An empty `label_selector` means unfiltered.
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<EntitySnapshot>, OrchestratorError>;

    /// Delete one pod.
    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), OrchestratorError>;
}

/// [`Orchestrator`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<EntitySnapshot>, OrchestratorError> {
        let pods: Api<corev1::Pod> = Api::namespaced(self.client.clone(), namespace);

        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }

        let list = pods.list(&params).await?;
        debug!(namespace, count = list.items.len(), "Listed pods");

        Ok(list
            .items
            .iter()
            .map(|pod| EntitySnapshot::from_pod(pod, namespace))
            .collect())
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), OrchestratorError> {
        let pods: Api<corev1::Pod> = Api::namespaced(self.client.clone(), namespace);

        let params = DeleteParams {
            grace_period_seconds: Some(options.grace_period_seconds),
            propagation_policy: Some(options.propagation.into()),
            ..Default::default()
        };

        pods.delete(name, &params).await?;
        Ok(())
    }
}

/// Build a Kubernetes client.
///
/// In-cluster service account credentials are tried first, then the local
/// kubeconfig (`KUBECONFIG` or `~/.kube/config`).
pub async fn connect() -> Result<Client, StartupError> {
    let config = match kube::Config::incluster() {
        Ok(config) => {
            info!("Using in-cluster credentials");
            config
        }
        Err(in_cluster) => {
            debug!(error = %in_cluster, "In-cluster credentials unavailable, trying kubeconfig");
            let config = kube::Config::from_kubeconfig(&KubeConfigOptions::default())
                .await
                .map_err(|kubeconfig| StartupError::Credential {
                    in_cluster: in_cluster.to_string(),
                    kubeconfig: kubeconfig.to_string(),
                })?;
            info!(cluster_url = %config.cluster_url, "Using kubeconfig credentials");
            config
        }
    };

    Ok(Client::try_from(config)?)
}
