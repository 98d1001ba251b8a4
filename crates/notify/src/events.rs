//! Notification event types for the pod watchdog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slack attachment color for a stuck pod (orange).
const POD_STUCK_COLOR: &str = "#f39c12";

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A pod stayed stuck past the grace period and remediation is delegated
    PodStuck {
        namespace: String,
        pod: String,
        phase: String,
        reason: String,
        stuck_for_secs: u64,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::PodStuck { namespace, pod, .. } => format!("Pod Stuck: {namespace}/{pod}"),
        }
    }

    /// Get the attachment color for this event.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::PodStuck { .. } => POD_STUCK_COLOR,
        }
    }

    /// Get the severity label shown in notification footers.
    #[must_use]
    pub const fn severity_label(&self) -> &'static str {
        match self {
            Self::PodStuck { .. } => "Warning",
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PodStuck { timestamp, .. } => *timestamp,
        }
    }
}

/// Format seconds into a human-readable duration.
#[must_use]
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let remaining_secs = secs % 60;
        if remaining_secs == 0 {
            format!("{mins}m")
        } else {
            format!("{mins}m {remaining_secs}s")
        }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    }
}
