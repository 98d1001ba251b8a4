//! Tracing setup: human-readable lines on stdout plus an append-only file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::StartupError;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(log_file: &Path, verbose: bool) -> Result<WorkerGuard, StartupError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let (dir, file_name) = split_log_path(log_file)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| StartupError::Logging(format!("{}: {e}", log_file.display())))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(|e| StartupError::Logging(e.to_string()))?;

    Ok(guard)
}

fn split_log_path(log_file: &Path) -> Result<(&Path, &str), StartupError> {
    let file_name = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            StartupError::Logging(format!("invalid log file path: {}", log_file.display()))
        })?;
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_file_name_logs_to_working_dir() {
        let (dir, name) = split_log_path(Path::new("watchdog.log")).unwrap();
        assert_eq!(dir, Path::new("."));
        assert_eq!(name, "watchdog.log");
    }

    #[test]
    fn test_nested_path_is_split() {
        let (dir, name) = split_log_path(Path::new("/var/log/watchdog/out.log")).unwrap();
        assert_eq!(dir, Path::new("/var/log/watchdog"));
        assert_eq!(name, "out.log");
    }

    #[test]
    fn test_directory_only_path_is_rejected() {
        assert!(matches!(
            split_log_path(Path::new("/")),
            Err(StartupError::Logging(_))
        ));
    }
}
