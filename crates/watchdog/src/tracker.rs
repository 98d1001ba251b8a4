//! Per-pod problem timers.
//!
//! A record holds the moment a pod was first seen stuck. It lives until the
//! pod recovers, disappears from the listing, or stays stuck long enough to
//! be remediated. Timers are kept in memory only; a restart forgets them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::inspector::{Classification, StuckReason};
use crate::k8s::EntityId;

/// What the caller should do after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do this cycle.
    NoAction,
    /// First stuck observation; a timer was started.
    StartedTracking,
    /// The pod stayed stuck for at least the timeout. The record has already
    /// been removed.
    ReadyToRemediate {
        elapsed: Duration,
        reason: StuckReason,
    },
}

/// First-seen-stuck timestamps keyed by pod identity.
#[derive(Debug, Default)]
pub struct ProblemTracker {
    first_seen: HashMap<EntityId, DateTime<Utc>>,
}

impl ProblemTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one classification into the timer map.
    pub fn update(
        &mut self,
        id: &EntityId,
        classification: &Classification,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Decision {
        let Classification::Stuck(reason) = classification else {
            if self.first_seen.remove(id).is_some() {
                debug!(pod = %id, "Pod recovered, clearing timer");
            }
            return Decision::NoAction;
        };

        let Some(first_seen) = self.first_seen.get(id).copied() else {
            self.first_seen.insert(id.clone(), now);
            return Decision::StartedTracking;
        };

        let elapsed = now - first_seen;
        if elapsed < TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX) {
            return Decision::NoAction;
        }

        self.first_seen.remove(id);
        Decision::ReadyToRemediate {
            elapsed: elapsed.to_std().unwrap_or_default(),
            reason: reason.clone(),
        }
    }

    /// Drop timers for pods that are no longer listed.
    ///
    /// Only call this with the result of a successful listing.
    pub fn retain_listed(&mut self, listed: &HashSet<EntityId>) -> usize {
        let before = self.first_seen.len();
        self.first_seen.retain(|id, _| {
            let keep = listed.contains(id);
            if !keep {
                debug!(pod = %id, "Pod no longer listed, clearing timer");
            }
            keep
        });
        before - self.first_seen.len()
    }

    pub fn is_tracking(&self, id: &EntityId) -> bool {
        self.first_seen.contains_key(id)
    }

    pub fn first_seen(&self, id: &EntityId) -> Option<DateTime<Utc>> {
        self.first_seen.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}
