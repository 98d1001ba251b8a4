//! Stuck-pod classification.
//!
//! The inspector looks at one snapshot and decides whether the pod is stuck.
//! It never reads the clock and never talks to the API server, so the same
//! snapshot, timeout and `now` always produce the same answer.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::k8s::{ContainerState, EntitySnapshot};

/// Waiting reasons watched when nothing else is configured.
pub const DEFAULT_WATCHED_REASONS: &[&str] = &[
    "ContainerCreating",
    "ErrImagePull",
    "ImagePullBackOff",
    "CrashLoopBackOff",
    "CreateContainerConfigError",
];

/// Reason tag reported for a running container that never became ready.
pub const RUNNING_NOT_READY: &str = "RunningNotReady";

/// Why a pod was classified as stuck.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StuckReason {
    /// A container is waiting with one of the watched reasons.
    Waiting(String),
    /// A container is running but has not reported ready.
    RunningNotReady,
}

impl StuckReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Waiting(reason) => reason,
            Self::RunningNotReady => RUNNING_NOT_READY,
        }
    }
}

impl fmt::Display for StuckReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of inspecting one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Healthy,
    Stuck(StuckReason),
}

impl Classification {
    pub fn is_stuck(&self) -> bool {
        matches!(self, Self::Stuck(_))
    }

    pub fn reason(&self) -> Option<&StuckReason> {
        match self {
            Self::Healthy => None,
            Self::Stuck(reason) => Some(reason),
        }
    }
}

/// Set of container waiting reasons that count as stuck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedReasons(BTreeSet<String>);

impl WatchedReasons {
    pub fn new<I, S>(reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(reasons.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, reason: &str) -> bool {
        self.0.contains(reason)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for WatchedReasons {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHED_REASONS.iter().copied())
    }
}

impl fmt::Display for WatchedReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(","))
    }
}

/// Classifies pod snapshots against a stuck timeout.
#[derive(Debug, Clone)]
pub struct Inspector {
    watched: WatchedReasons,
    timeout: TimeDelta,
}

impl Inspector {
    pub fn new(watched: WatchedReasons, timeout: Duration) -> Self {
        Self {
            watched,
            timeout: TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Classify one snapshot as of `now`.
    ///
    /// Containers are scanned in order and the first match wins; later
    /// containers are not looked at.
    pub fn classify(&self, snapshot: &EntitySnapshot, now: DateTime<Utc>) -> Classification {
        if snapshot.phase.is_settled() {
            return Classification::Healthy;
        }

        for container in &snapshot.containers {
            match &container.state {
                ContainerState::Waiting {
                    reason: Some(reason),
                } if self.watched.contains(reason) => {
                    if self.exceeded(snapshot.created_at, now) {
                        return Classification::Stuck(StuckReason::Waiting(reason.clone()));
                    }
                }
                ContainerState::Running { started_at } if !container.ready => {
                    if self.exceeded(*started_at, now) {
                        return Classification::Stuck(StuckReason::RunningNotReady);
                    }
                }
                _ => {}
            }
        }

        Classification::Healthy
    }

    /// Strictly longer than the timeout; a missing timestamp never qualifies.
    fn exceeded(&self, since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        since.is_some_and(|since| now - since > self.timeout)
    }
}
