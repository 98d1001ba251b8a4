//! Pod watchdog binary.
//!
//! Watches pods in one namespace and remediates the ones stuck past
//! `PENDING_TIMEOUT`. All tuning comes from the environment; the command line
//! only controls how the process runs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use notify::Notifier;
use tokio::signal;
use tracing::{error, info, warn};
use watchdog::{
    k8s, logging, KubeOrchestrator, NotifyExternal, Orchestrator, ProblemTracker, RecreatePod,
    RemediationMode, Remediator, StartupError, Watchdog, WatchdogConfig,
};

/// Detects pods stuck past a grace period and remediates them
#[derive(Parser)]
#[command(name = "pod-watchdog")]
#[command(version)]
struct Cli {
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Append-only log file, written alongside stdout
    #[arg(long, env = "LOG_FILE", default_value = "watchdog.log")]
    log_file: PathBuf,

    /// Enable debug logging when RUST_LOG is unset
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = WatchdogConfig::from_env();
    let _guard = logging::init(&cli.log_file, cli.verbose)?;

    for fallback in &config.fallbacks {
        warn!("{fallback}");
    }
    info!(
        "Starting pod watchdog v{}: {config}",
        env!("CARGO_PKG_VERSION")
    );

    let client = k8s::connect()
        .await
        .context("Failed to connect to Kubernetes")?;
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(KubeOrchestrator::new(client));
    let remediator = build_remediator(config.remediation, orchestrator.clone())?;
    info!(strategy = remediator.name(), "Remediation strategy ready");

    let mut watchdog = Watchdog::new(config, orchestrator, remediator, ProblemTracker::new());

    if cli.once {
        watchdog.run_cycle().await?;
        return Ok(());
    }

    watchdog.run(shutdown_signal()).await;
    info!("Pod watchdog stopped");
    Ok(())
}

fn build_remediator(
    mode: RemediationMode,
    orchestrator: Arc<dyn Orchestrator>,
) -> Result<Arc<dyn Remediator>, StartupError> {
    match mode {
        RemediationMode::Recreate => Ok(Arc::new(RecreatePod::new(orchestrator))),
        RemediationMode::Notify => {
            let notifier = Notifier::from_env();
            if !notifier.has_channels() {
                return Err(StartupError::NotifyUnconfigured);
            }
            info!(
                channels = notifier.channel_count(),
                "Notification channels enabled"
            );
            Ok(Arc::new(NotifyExternal::new(notifier)))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
