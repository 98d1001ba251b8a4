//! The reconciliation loop.
//!
//! Each tick lists pods, classifies them, folds the result into the problem
//! tracker and remediates pods whose stuck episode ran past the timeout.
//! Cycles never overlap: the next tick is awaited only after the current
//! cycle returns.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::WatchdogConfig;
use crate::error::ListError;
use crate::events::RemediationEvent;
use crate::inspector::Inspector;
use crate::k8s::{EntityId, EntitySnapshot, Orchestrator};
use crate::remediation::Remediator;
use crate::tracker::{Decision, ProblemTracker};

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// When the cycle started.
    pub run_time: DateTime<Utc>,
    /// Pods returned by the listing.
    pub pods_listed: usize,
    /// Pods classified stuck this cycle.
    pub pods_stuck: usize,
    /// Stuck episodes opened this cycle.
    pub tracking_started: usize,
    /// Remediations that succeeded.
    pub remediated: usize,
    /// Remediations that failed.
    pub remediation_failed: usize,
    /// Open stuck episodes after the cycle.
    pub still_tracked: usize,
}

/// Drives detection and remediation for one namespace.
pub struct Watchdog {
    config: WatchdogConfig,
    inspector: Inspector,
    orchestrator: Arc<dyn Orchestrator>,
    remediator: Arc<dyn Remediator>,
    tracker: ProblemTracker,
}

impl Watchdog {
    /// Create a watchdog that owns `tracker` for its whole lifetime.
    pub fn new(
        config: WatchdogConfig,
        orchestrator: Arc<dyn Orchestrator>,
        remediator: Arc<dyn Remediator>,
        tracker: ProblemTracker,
    ) -> Self {
        let inspector = Inspector::new(config.watched_reasons.clone(), config.pending_timeout);
        Self {
            config,
            inspector,
            orchestrator,
            remediator,
            tracker,
        }
    }

    pub fn tracker(&self) -> &ProblemTracker {
        &self.tracker
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Run cycles on a fixed interval until `shutdown` resolves.
    ///
    /// Shutdown is only observed between cycles; a running cycle is allowed
    /// to finish.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping watchdog");
                    return;
                }
                _ = ticker.tick() => {}
            }

            // Failures are already logged inside the cycle.
            let _ = self.run_cycle().await;
        }
    }

    /// Run one cycle against the wall clock.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ListError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now`.
    ///
    /// On a listing failure the tracker is left exactly as it was.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport, ListError> {
        let deadline = cycle_deadline(Instant::now(), self.config.cycle_timeout);
        info!(
            namespace = %self.config.namespace,
            label_selector = %self.config.label_selector,
            "Checking pods"
        );

        let pods = match self.list_pods(deadline).await {
            Ok(pods) => pods,
            Err(e) => {
                error!(error = %e, "Skipping cycle, problem timers left untouched");
                return Err(e);
            }
        };

        let timeout = self.config.pending_timeout;
        let mut report = CycleReport {
            run_time: now,
            pods_listed: pods.len(),
            ..CycleReport::default()
        };
        let mut listed = HashSet::with_capacity(pods.len());

        for pod in &pods {
            listed.insert(pod.id.clone());

            let classification = self.inspector.classify(pod, now);
            if classification.is_stuck() {
                report.pods_stuck += 1;
            }

            match self.tracker.update(&pod.id, &classification, now, timeout) {
                Decision::NoAction => {}
                Decision::StartedTracking => {
                    report.tracking_started += 1;
                    let reason = classification.reason().map(ToString::to_string);
                    warn!(
                        pod = %pod.id,
                        reason = reason.as_deref().unwrap_or_default(),
                        "Problem detected, starting timer"
                    );
                }
                Decision::ReadyToRemediate { elapsed, reason } => {
                    let event = RemediationEvent::new(pod, &reason, elapsed, now);
                    if self.remediate(&pod.id, &event, deadline).await {
                        report.remediated += 1;
                    } else {
                        report.remediation_failed += 1;
                    }
                }
            }
        }

        let pruned = self.tracker.retain_listed(&listed);
        if pruned > 0 {
            debug!(pruned, "Cleared timers for pods that are gone");
        }

        report.still_tracked = self.tracker.len();
        info!(
            pods = report.pods_listed,
            stuck = report.pods_stuck,
            tracking_started = report.tracking_started,
            remediated = report.remediated,
            failed = report.remediation_failed,
            tracked = report.still_tracked,
            "Cycle complete"
        );

        Ok(report)
    }

    async fn list_pods(&self, deadline: Instant) -> Result<Vec<EntitySnapshot>, ListError> {
        let list = self
            .orchestrator
            .list(&self.config.namespace, &self.config.label_selector);

        match timeout_at(deadline, list).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ListError::DeadlineExceeded(self.config.cycle_timeout)),
        }
    }

    /// Returns whether the remediation succeeded. The outcome is only logged;
    /// the tracker record is already gone either way.
    async fn remediate(&self, id: &EntityId, event: &RemediationEvent, deadline: Instant) -> bool {
        let details = serde_json::to_string(event).unwrap_or_default();
        warn!(
            pod = %id,
            reason = %event.reason,
            stuck_for_secs = event.stuck_for_secs,
            strategy = self.remediator.name(),
            details = %details,
            "Remediating stuck pod"
        );

        match self.remediator.remediate(event, deadline).await {
            Ok(()) => {
                info!(pod = %id, strategy = self.remediator.name(), "Remediation succeeded");
                true
            }
            Err(e) => {
                error!(
                    pod = %id,
                    strategy = self.remediator.name(),
                    error = %e,
                    "Remediation failed"
                );
                false
            }
        }
    }
}

/// Deadline for a cycle starting at `start`. A timeout too large to represent
/// is clamped to roughly 30 years out.
fn cycle_deadline(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, RemediationError};
    use crate::inspector::StuckReason;
    use crate::k8s::{ContainerSnapshot, ContainerState, DeleteOptions, Phase};
    use crate::remediation::{MockRemediator, RecreatePod};
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Listing = Result<Vec<EntitySnapshot>, OrchestratorError>;

    /// Serves scripted listings and records deletions.
    #[derive(Default)]
    struct ScriptedCluster {
        listings: Mutex<VecDeque<Listing>>,
        deleted: Mutex<Vec<(String, String, DeleteOptions)>>,
    }

    impl ScriptedCluster {
        fn push(&self, listing: Listing) {
            self.listings.lock().unwrap().push_back(listing);
        }

        fn deleted(&self) -> Vec<(String, String, DeleteOptions)> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Orchestrator for ScriptedCluster {
        async fn list(&self, _namespace: &str, _label_selector: &str) -> Listing {
            self.listings
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }

        async fn delete(
            &self,
            namespace: &str,
            name: &str,
            options: &DeleteOptions,
        ) -> Result<(), OrchestratorError> {
            self.deleted
                .lock()
                .unwrap()
                .push((namespace.to_string(), name.to_string(), *options));
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        "2025-01-01T00:00:00Z".parse().unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn pod(name: &str, phase: Phase, state: ContainerState, ready: bool) -> EntitySnapshot {
        EntitySnapshot {
            id: EntityId::new("default", name),
            phase,
            created_at: Some(t0()),
            containers: vec![ContainerSnapshot {
                name: "app".to_string(),
                state,
                ready,
            }],
        }
    }

    fn waiting(name: &str, reason: &str) -> EntitySnapshot {
        pod(
            name,
            Phase::Pending,
            ContainerState::Waiting {
                reason: Some(reason.to_string()),
            },
            false,
        )
    }

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            pending_timeout: Duration::from_secs(300),
            check_interval: Duration::from_secs(30),
            ..WatchdogConfig::default()
        }
    }

    fn recreate_watchdog(cluster: &Arc<ScriptedCluster>) -> Watchdog {
        let orchestrator: Arc<dyn Orchestrator> = cluster.clone();
        Watchdog::new(
            config(),
            orchestrator.clone(),
            Arc::new(RecreatePod::new(orchestrator)),
            ProblemTracker::new(),
        )
    }

    #[tokio::test]
    async fn test_young_pod_is_not_tracked() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut watchdog = recreate_watchdog(&cluster);
        let p1 = EntityId::new("default", "p1");

        // Cycles every 30s; the pod only counts as stuck once older than 5m.
        for secs in (0..=300).step_by(30) {
            cluster.push(Ok(vec![waiting("p1", "ImagePullBackOff")]));
            let report = watchdog.run_cycle_at(at(secs)).await.unwrap();
            assert_eq!(report.pods_stuck, 0, "not stuck at {secs}s");
        }
        assert!(watchdog.tracker().is_empty());

        cluster.push(Ok(vec![waiting("p1", "ImagePullBackOff")]));
        watchdog.run_cycle_at(at(330)).await.unwrap();

        assert!(cluster.deleted().is_empty());
        assert_eq!(watchdog.tracker().first_seen(&p1), Some(at(330)));
    }

    #[tokio::test]
    async fn test_scenario_a_remediation_at_threshold() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut watchdog = recreate_watchdog(&cluster);
        let p1 = EntityId::new("default", "p1");

        // First stuck observation opens the episode.
        cluster.push(Ok(vec![waiting("p1", "ImagePullBackOff")]));
        let report = watchdog.run_cycle_at(at(310)).await.unwrap();
        assert_eq!(report.tracking_started, 1);
        assert!(watchdog.tracker().is_tracking(&p1));

        // Still inside the grace window.
        cluster.push(Ok(vec![waiting("p1", "ImagePullBackOff")]));
        watchdog.run_cycle_at(at(580)).await.unwrap();
        assert!(cluster.deleted().is_empty());

        // Exactly one delete once the episode reaches the timeout.
        cluster.push(Ok(vec![waiting("p1", "ImagePullBackOff")]));
        let report = watchdog.run_cycle_at(at(610)).await.unwrap();
        assert_eq!(report.remediated, 1);
        assert!(!watchdog.tracker().is_tracking(&p1));

        let deleted = cluster.deleted();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].0, "default");
        assert_eq!(deleted[0].1, "p1");
        assert_eq!(deleted[0].2, DeleteOptions::force_foreground());

        // Next cycle: the pod is gone and nothing is tracked.
        cluster.push(Ok(vec![]));
        watchdog.run_cycle_at(at(640)).await.unwrap();
        assert!(watchdog.tracker().is_empty());
        assert_eq!(cluster.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_b_unwatched_reason_never_tracked() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut watchdog = recreate_watchdog(&cluster);

        for secs in [0, 600, 3_600, 86_400] {
            cluster.push(Ok(vec![waiting("p2", "PodInitializing")]));
            let report = watchdog.run_cycle_at(at(secs)).await.unwrap();
            assert_eq!(report.pods_stuck, 0);
            assert!(watchdog.tracker().is_empty());
        }
        assert!(cluster.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_c_recovery_before_timeout() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut watchdog = recreate_watchdog(&cluster);
        let p3 = EntityId::new("default", "p3");

        cluster.push(Ok(vec![waiting("p3", "CrashLoopBackOff")]));
        watchdog.run_cycle_at(at(301)).await.unwrap();
        assert!(watchdog.tracker().is_tracking(&p3));

        let recovered = pod(
            "p3",
            Phase::Running,
            ContainerState::Running {
                started_at: Some(at(400)),
            },
            true,
        );
        cluster.push(Ok(vec![recovered]));
        watchdog.run_cycle_at(at(481)).await.unwrap();

        assert!(!watchdog.tracker().is_tracking(&p3));
        assert!(cluster.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_leaves_timers_untouched() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut watchdog = recreate_watchdog(&cluster);
        let p1 = EntityId::new("default", "p1");

        cluster.push(Ok(vec![waiting("p1", "ErrImagePull")]));
        watchdog.run_cycle_at(at(400)).await.unwrap();

        cluster.push(Err(OrchestratorError::Forbidden(
            "pods is forbidden".to_string(),
        )));
        let err = watchdog.run_cycle_at(at(430)).await.unwrap_err();
        assert!(matches!(err, ListError::Orchestrator(_)));
        assert_eq!(watchdog.tracker().first_seen(&p1), Some(at(400)));

        // The first timestamp still governs the episode.
        cluster.push(Ok(vec![waiting("p1", "ErrImagePull")]));
        let report = watchdog.run_cycle_at(at(700)).await.unwrap();
        assert_eq!(report.remediated, 1);
    }

    #[tokio::test]
    async fn test_failed_remediation_still_closes_episode() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut remediator = MockRemediator::new();
        remediator.expect_name().return_const("mock");
        remediator
            .expect_remediate()
            .times(1)
            .returning(|_, _| Err(RemediationError::DeadlineExceeded));

        let mut watchdog = Watchdog::new(
            config(),
            cluster.clone(),
            Arc::new(remediator),
            ProblemTracker::new(),
        );
        let p1 = EntityId::new("default", "p1");

        cluster.push(Ok(vec![waiting("p1", "ContainerCreating")]));
        watchdog.run_cycle_at(at(301)).await.unwrap();

        cluster.push(Ok(vec![waiting("p1", "ContainerCreating")]));
        let report = watchdog.run_cycle_at(at(601)).await.unwrap();
        assert_eq!(report.remediation_failed, 1);
        assert!(!watchdog.tracker().is_tracking(&p1));

        // A new full window is needed before another attempt.
        cluster.push(Ok(vec![waiting("p1", "ContainerCreating")]));
        let report = watchdog.run_cycle_at(at(631)).await.unwrap();
        assert_eq!(report.tracking_started, 1);
    }

    #[tokio::test]
    async fn test_remediation_receives_event_for_running_not_ready() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut remediator = MockRemediator::new();
        remediator.expect_name().return_const("mock");
        remediator
            .expect_remediate()
            .withf(|event, _| {
                event.name == "p4"
                    && event.reason == StuckReason::RunningNotReady.to_string()
                    && event.stuck_for_secs == 300
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut watchdog = Watchdog::new(
            config(),
            cluster.clone(),
            Arc::new(remediator),
            ProblemTracker::new(),
        );
        let not_ready = pod(
            "p4",
            Phase::Running,
            ContainerState::Running {
                started_at: Some(t0()),
            },
            false,
        );

        cluster.push(Ok(vec![not_ready.clone()]));
        watchdog.run_cycle_at(at(400)).await.unwrap();
        cluster.push(Ok(vec![not_ready]));
        let report = watchdog.run_cycle_at(at(700)).await.unwrap();

        assert_eq!(report.remediated, 1);
    }

    #[tokio::test]
    async fn test_tracker_matches_latest_classification() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut watchdog = recreate_watchdog(&cluster);
        let stuck = EntityId::new("default", "stuck");
        let healthy = EntityId::new("default", "healthy");

        let healthy_pod = pod(
            "healthy",
            Phase::Running,
            ContainerState::Running {
                started_at: Some(t0()),
            },
            true,
        );

        for secs in [400, 430, 460] {
            cluster.push(Ok(vec![
                waiting("stuck", "ImagePullBackOff"),
                healthy_pod.clone(),
            ]));
            let report = watchdog.run_cycle_at(at(secs)).await.unwrap();
            assert_eq!(report.pods_listed, 2);
            assert_eq!(report.still_tracked, 1);
        }

        assert!(watchdog.tracker().is_tracking(&stuck));
        assert!(!watchdog.tracker().is_tracking(&healthy));
    }

    #[tokio::test]
    async fn test_vanished_pod_loses_its_timer() {
        let cluster = Arc::new(ScriptedCluster::default());
        let mut watchdog = recreate_watchdog(&cluster);

        cluster.push(Ok(vec![waiting("p1", "ImagePullBackOff")]));
        watchdog.run_cycle_at(at(400)).await.unwrap();
        assert_eq!(watchdog.tracker().len(), 1);

        cluster.push(Ok(vec![]));
        watchdog.run_cycle_at(at(430)).await.unwrap();
        assert!(watchdog.tracker().is_empty());
    }

    struct StalledCluster;

    #[async_trait]
    impl Orchestrator for StalledCluster {
        async fn list(&self, _namespace: &str, _label_selector: &str) -> Listing {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }

        async fn delete(
            &self,
            _namespace: &str,
            _name: &str,
            _options: &DeleteOptions,
        ) -> Result<(), OrchestratorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_list_deadline_skips_cycle() {
        let config = WatchdogConfig {
            cycle_timeout: Duration::from_millis(50),
            ..config()
        };
        let mut remediator = MockRemediator::new();
        remediator.expect_remediate().never();

        let mut watchdog = Watchdog::new(
            config,
            Arc::new(StalledCluster),
            Arc::new(remediator),
            ProblemTracker::new(),
        );

        let err = watchdog.run_cycle_at(at(0)).await.unwrap_err();
        assert!(matches!(err, ListError::DeadlineExceeded(_)));
    }

    #[test]
    fn test_cycle_deadline_clamps_unrepresentable_timeout() {
        let start = Instant::now();

        assert_eq!(
            cycle_deadline(start, Duration::from_secs(20)),
            start + Duration::from_secs(20)
        );
        assert_eq!(cycle_deadline(start, Duration::MAX), start + FAR_FUTURE);
    }

    #[tokio::test]
    async fn test_huge_cycle_timeout_does_not_abort_cycle() {
        let cluster = Arc::new(ScriptedCluster::default());
        let orchestrator: Arc<dyn Orchestrator> = cluster.clone();
        let config = WatchdogConfig {
            cycle_timeout: Duration::from_secs(i64::MAX as u64),
            ..config()
        };
        let mut watchdog = Watchdog::new(
            config,
            orchestrator.clone(),
            Arc::new(RecreatePod::new(orchestrator)),
            ProblemTracker::new(),
        );

        cluster.push(Ok(vec![waiting("p1", "ImagePullBackOff")]));
        let report = watchdog.run_cycle_at(at(400)).await.unwrap();
        assert_eq!(report.tracking_started, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let cluster = Arc::new(ScriptedCluster::default());
        let watchdog = recreate_watchdog(&cluster);

        tokio::time::timeout(Duration::from_secs(5), watchdog.run(async {}))
            .await
            .expect("run should return once shutdown resolves");
    }
}
