//! Remediation strategies.
//!
//! Exactly one strategy is active per process. The loop only sees the
//! [`Remediator`] trait, so adding a strategy never touches detection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use notify::Notifier;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::error::RemediationError;
use crate::events::RemediationEvent;
use crate::k8s::{DeleteOptions, Orchestrator};

/// Which strategy a deployment uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemediationMode {
    /// Delete the pod and let its owner recreate it.
    #[default]
    Recreate,
    /// Hand the stuck pod to an external system.
    Notify,
}

impl FromStr for RemediationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recreate" | "delete" => Ok(Self::Recreate),
            "notify" => Ok(Self::Notify),
            other => Err(format!("unknown remediation mode: {other}")),
        }
    }
}

impl fmt::Display for RemediationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recreate => f.write_str("recreate"),
            Self::Notify => f.write_str("notify"),
        }
    }
}

/// A corrective action for one stuck pod.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Remediator: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Act on one stuck pod, giving up at `deadline`. Never retries.
    async fn remediate(
        &self,
        event: &RemediationEvent,
        deadline: Instant,
    ) -> Result<(), RemediationError>;
}

/// Deletes the pod with zero grace period and foreground propagation.
pub struct RecreatePod {
    orchestrator: Arc<dyn Orchestrator>,
}

impl RecreatePod {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Remediator for RecreatePod {
    fn name(&self) -> &'static str {
        "recreate"
    }

    async fn remediate(
        &self,
        event: &RemediationEvent,
        deadline: Instant,
    ) -> Result<(), RemediationError> {
        debug!(namespace = %event.namespace, pod = %event.name, "Deleting pod");

        let options = DeleteOptions::force_foreground();
        let delete = self
            .orchestrator
            .delete(&event.namespace, &event.name, &options);

        match timeout_at(deadline, delete).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RemediationError::DeadlineExceeded),
        }
    }
}

/// Sends a [`notify::NotifyEvent::PodStuck`] to every enabled channel.
pub struct NotifyExternal {
    notifier: Notifier,
}

impl NotifyExternal {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Remediator for NotifyExternal {
    fn name(&self) -> &'static str {
        "notify"
    }

    async fn remediate(
        &self,
        event: &RemediationEvent,
        deadline: Instant,
    ) -> Result<(), RemediationError> {
        if !self.notifier.has_channels() {
            return Err(RemediationError::NoChannels);
        }

        let results = timeout_at(deadline, self.notifier.notify_and_wait(event.into()))
            .await
            .map_err(|_| RemediationError::DeadlineExceeded)?;

        for (channel, result) in results {
            result.map_err(|source| RemediationError::Notify { channel, source })?;
        }

        Ok(())
    }
}
