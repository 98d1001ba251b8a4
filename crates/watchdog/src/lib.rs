//! Pod watchdog.
//!
//! Periodically lists pods in one namespace, finds pods that have been stuck
//! past a grace period, and remediates them by recreating the pod or by
//! handing it to an external system through [`notify`].
//!
//! The pieces compose bottom-up:
//!
//! - [`inspector::Inspector`] classifies a single pod snapshot as healthy or stuck
//! - [`tracker::ProblemTracker`] times each stuck episode across cycles
//! - [`remediation::Remediator`] acts on pods whose episode ran past the timeout
//! - [`controller::Watchdog`] drives all of the above on a fixed interval

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod inspector;
pub mod k8s;
pub mod logging;
pub mod remediation;
pub mod tracker;

pub use config::WatchdogConfig;
pub use controller::{CycleReport, Watchdog};
pub use error::{ListError, OrchestratorError, RemediationError, StartupError};
pub use inspector::{Classification, Inspector, StuckReason, WatchedReasons};
pub use k8s::{EntityId, EntitySnapshot, KubeOrchestrator, Orchestrator};
pub use remediation::{NotifyExternal, RecreatePod, RemediationMode, Remediator};
pub use tracker::{Decision, ProblemTracker};
