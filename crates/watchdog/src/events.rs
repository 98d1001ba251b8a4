//! Audit records emitted to the log.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inspector::StuckReason;
use crate::k8s::EntitySnapshot;

/// One remediation decision, logged as a single JSON line and then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationEvent {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub reason: String,
    pub stuck_for_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl RemediationEvent {
    pub fn new(
        snapshot: &EntitySnapshot,
        reason: &StuckReason,
        elapsed: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: snapshot.id.namespace.clone(),
            name: snapshot.id.name.clone(),
            phase: snapshot.phase.as_str().to_string(),
            reason: reason.to_string(),
            stuck_for_secs: elapsed.as_secs(),
            timestamp,
        }
    }
}

impl From<&RemediationEvent> for notify::NotifyEvent {
    fn from(event: &RemediationEvent) -> Self {
        Self::PodStuck {
            namespace: event.namespace.clone(),
            pod: event.name.clone(),
            phase: event.phase.clone(),
            reason: event.reason.clone(),
            stuck_for_secs: event.stuck_for_secs,
            timestamp: event.timestamp,
        }
    }
}
