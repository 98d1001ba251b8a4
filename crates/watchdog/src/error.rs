//! Error types for the watchdog.
//!
//! Only [`StartupError`] is fatal. Everything raised inside a cycle is logged
//! and the loop moves on.

use std::time::Duration;

use thiserror::Error;

/// Errors that stop the process before the first cycle.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Neither in-cluster identity nor a kubeconfig could be loaded
    #[error("failed to resolve Kubernetes credentials (in-cluster: {in_cluster}; kubeconfig: {kubeconfig})")]
    Credential {
        in_cluster: String,
        kubeconfig: String,
    },

    /// Credentials resolved but the client could not be built
    #[error("failed to build Kubernetes client: {0}")]
    Client(#[from] kube::Error),

    /// Notification mode selected without any channel to deliver to
    #[error("REMEDIATION_MODE=notify requires NOTIFY_WEBHOOK_URL or SLACK_WEBHOOK_URL")]
    NotifyUnconfigured,

    /// Log sink could not be opened
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// A configuration value that could not be used; the default was substituted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {key}={value:?}, fallback to {fallback}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub fallback: String,
}

/// Errors returned by the orchestrator collaborator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The target resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The service account is not allowed to perform the call
    #[error("permission denied: {0}")]
    Forbidden(String),

    /// Any other Kubernetes API or transport failure
    #[error("Kubernetes API error: {0}")]
    Kube(kube::Error),
}

impl From<kube::Error> for OrchestratorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound(resp.message),
            kube::Error::Api(resp) if resp.code == 403 => Self::Forbidden(resp.message),
            other => Self::Kube(other),
        }
    }
}

/// Listing pods failed; the cycle is skipped.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("list pods error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("list pods did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

/// A remediation attempt failed. The stuck episode is closed regardless.
#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("delete failed: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("notify failed on channel {channel}: {source}")]
    Notify {
        channel: String,
        #[source]
        source: notify::ChannelError,
    },

    #[error("no notification channel is enabled")]
    NoChannels,

    #[error("remediation cancelled: cycle deadline exceeded")]
    DeadlineExceeded,
}
