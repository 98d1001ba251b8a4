//! Watchdog configuration from environment variables.
//!
//! Bad values never stop the process: the default is used instead and the
//! substitution is kept in [`WatchdogConfig::fallbacks`] so it can be logged
//! once logging is up.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;
use crate::inspector::WatchedReasons;
use crate::remediation::RemediationMode;

const ENV_NAMESPACE: &str = "NAMESPACE";
const ENV_LABEL_SELECTOR: &str = "LABEL_SELECTOR";
const ENV_PENDING_TIMEOUT: &str = "PENDING_TIMEOUT";
const ENV_CHECK_INTERVAL: &str = "CHECK_INTERVAL";
const ENV_CYCLE_TIMEOUT: &str = "CYCLE_TIMEOUT";
const ENV_WATCHED_REASONS: &str = "WATCHED_REASONS";
const ENV_REMEDIATION_MODE: &str = "REMEDIATION_MODE";

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_PENDING_TIMEOUT_MINS: u64 = 5;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 20;

const MAX_PENDING_TIMEOUT_MINS: u64 = 7 * 24 * 60;
const MAX_CHECK_INTERVAL_SECS: u64 = 24 * 60 * 60;
const MAX_CYCLE_TIMEOUT_SECS: u64 = 60 * 60;

/// Resolved watchdog settings.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Namespace whose pods are listed.
    pub namespace: String,
    /// Label selector for the listing; empty means every pod.
    pub label_selector: String,
    /// How long a pod may stay stuck before remediation.
    pub pending_timeout: Duration,
    /// Period between cycle starts.
    pub check_interval: Duration,
    /// Deadline for one cycle's API calls.
    pub cycle_timeout: Duration,
    /// Container waiting reasons that count as stuck.
    pub watched_reasons: WatchedReasons,
    /// Active remediation strategy.
    pub remediation: RemediationMode,
    /// Values that were rejected in favour of a default.
    pub fallbacks: Vec<ConfigError>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            label_selector: String::new(),
            pending_timeout: Duration::from_secs(DEFAULT_PENDING_TIMEOUT_MINS * 60),
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            cycle_timeout: Duration::from_secs(DEFAULT_CYCLE_TIMEOUT_SECS),
            watched_reasons: WatchedReasons::default(),
            remediation: RemediationMode::default(),
            fallbacks: Vec::new(),
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(namespace) = get(ENV_NAMESPACE) {
            config.namespace = namespace.trim().to_string();
        }
        if let Some(selector) = get(ENV_LABEL_SELECTOR) {
            config.label_selector = selector.trim().to_string();
        }

        if let Some(raw) = get(ENV_PENDING_TIMEOUT) {
            match parse_bounded(&raw, MAX_PENDING_TIMEOUT_MINS) {
                Some(mins) => config.pending_timeout = Duration::from_secs(mins * 60),
                None => config.reject(
                    ENV_PENDING_TIMEOUT,
                    raw,
                    format!("{DEFAULT_PENDING_TIMEOUT_MINS}m"),
                ),
            }
        }

        if let Some(raw) = get(ENV_CHECK_INTERVAL) {
            match parse_bounded(&raw, MAX_CHECK_INTERVAL_SECS) {
                Some(secs) => config.check_interval = Duration::from_secs(secs),
                None => config.reject(
                    ENV_CHECK_INTERVAL,
                    raw,
                    format!("{DEFAULT_CHECK_INTERVAL_SECS}s"),
                ),
            }
        }

        if let Some(raw) = get(ENV_CYCLE_TIMEOUT) {
            match parse_bounded(&raw, MAX_CYCLE_TIMEOUT_SECS) {
                Some(secs) => config.cycle_timeout = Duration::from_secs(secs),
                None => config.reject(
                    ENV_CYCLE_TIMEOUT,
                    raw,
                    format!("{DEFAULT_CYCLE_TIMEOUT_SECS}s"),
                ),
            }
        }

        if let Some(raw) = get(ENV_WATCHED_REASONS) {
            let reasons = WatchedReasons::new(
                raw.split(',')
                    .map(str::trim)
                    .filter(|reason| !reason.is_empty()),
            );
            if reasons.is_empty() {
                let fallback = config.watched_reasons.to_string();
                config.reject(ENV_WATCHED_REASONS, raw, fallback);
            } else {
                config.watched_reasons = reasons;
            }
        }

        if let Some(raw) = get(ENV_REMEDIATION_MODE) {
            match raw.parse() {
                Ok(mode) => config.remediation = mode,
                Err(_) => {
                    let fallback = config.remediation.to_string();
                    config.reject(ENV_REMEDIATION_MODE, raw, fallback);
                }
            }
        }

        config
    }

    fn reject(&mut self, key: &'static str, value: String, fallback: String) {
        self.fallbacks.push(ConfigError {
            key,
            value,
            fallback,
        });
    }
}

impl fmt::Display for WatchdogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "namespace={}, labelSelector={:?}, timeout={:?}, interval={:?}, cycleTimeout={:?}, remediation={}, watched=[{}]",
            self.namespace,
            self.label_selector,
            self.pending_timeout,
            self.check_interval,
            self.cycle_timeout,
            self.remediation,
            self.watched_reasons,
        )
    }
}

/// Parse an integer in `1..=max`.
fn parse_bounded(raw: &str, max: u64) -> Option<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|v| (1..=max).contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> WatchdogConfig {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        WatchdogConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]);

        assert_eq!(config.namespace, "default");
        assert!(config.label_selector.is_empty());
        assert_eq!(config.pending_timeout, Duration::from_secs(300));
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.cycle_timeout, Duration::from_secs(20));
        assert_eq!(config.remediation, RemediationMode::Recreate);
        assert_eq!(config.watched_reasons, WatchedReasons::default());
        assert!(config.fallbacks.is_empty());
    }

    #[test]
    fn test_valid_overrides() {
        let config = load(&[
            ("NAMESPACE", "payments"),
            ("LABEL_SELECTOR", "app=api"),
            ("PENDING_TIMEOUT", "10"),
            ("CHECK_INTERVAL", "15"),
            ("CYCLE_TIMEOUT", "5"),
            ("WATCHED_REASONS", "ErrImagePull, CrashLoopBackOff,"),
            ("REMEDIATION_MODE", "notify"),
        ]);

        assert_eq!(config.namespace, "payments");
        assert_eq!(config.label_selector, "app=api");
        assert_eq!(config.pending_timeout, Duration::from_secs(600));
        assert_eq!(config.check_interval, Duration::from_secs(15));
        assert_eq!(config.cycle_timeout, Duration::from_secs(5));
        assert_eq!(
            config.watched_reasons,
            WatchedReasons::new(["CrashLoopBackOff", "ErrImagePull"])
        );
        assert_eq!(config.remediation, RemediationMode::Notify);
        assert!(config.fallbacks.is_empty());
    }

    #[test]
    fn test_invalid_values_fall_back_with_warning() {
        let config = load(&[("CHECK_INTERVAL", "-5"), ("PENDING_TIMEOUT", "abc")]);

        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.pending_timeout, Duration::from_secs(300));
        assert_eq!(config.fallbacks.len(), 2);

        let messages: Vec<String> = config.fallbacks.iter().map(ToString::to_string).collect();
        assert!(messages.contains(&"Invalid PENDING_TIMEOUT=\"abc\", fallback to 5m".to_string()));
        assert!(messages.contains(&"Invalid CHECK_INTERVAL=\"-5\", fallback to 30s".to_string()));
    }

    #[test]
    fn test_zero_is_rejected() {
        let config = load(&[("CYCLE_TIMEOUT", "0")]);

        assert_eq!(config.cycle_timeout, Duration::from_secs(20));
        assert_eq!(config.fallbacks[0].key, "CYCLE_TIMEOUT");
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        let config = load(&[
            ("CYCLE_TIMEOUT", "9223372036854775807"),
            ("PENDING_TIMEOUT", "99999999999999999999"),
            ("CHECK_INTERVAL", "86401"),
        ]);

        assert_eq!(config.cycle_timeout, Duration::from_secs(20));
        assert_eq!(config.pending_timeout, Duration::from_secs(300));
        assert_eq!(config.check_interval, Duration::from_secs(30));

        let keys: Vec<&str> = config.fallbacks.iter().map(|f| f.key).collect();
        assert_eq!(keys, ["PENDING_TIMEOUT", "CHECK_INTERVAL", "CYCLE_TIMEOUT"]);
    }

    #[test]
    fn test_upper_bounds_are_accepted() {
        let config = load(&[
            ("PENDING_TIMEOUT", "10080"),
            ("CHECK_INTERVAL", "86400"),
            ("CYCLE_TIMEOUT", "3600"),
        ]);

        assert_eq!(config.pending_timeout, Duration::from_secs(10_080 * 60));
        assert_eq!(config.check_interval, Duration::from_secs(86_400));
        assert_eq!(config.cycle_timeout, Duration::from_secs(3_600));
        assert!(config.fallbacks.is_empty());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = load(&[("NAMESPACE", ""), ("PENDING_TIMEOUT", "  ")]);

        assert_eq!(config.namespace, "default");
        assert!(config.fallbacks.is_empty());
    }

    #[test]
    fn test_unknown_mode_and_blank_reasons_fall_back() {
        let config = load(&[("REMEDIATION_MODE", "restart"), ("WATCHED_REASONS", " , ")]);

        assert_eq!(config.remediation, RemediationMode::Recreate);
        assert_eq!(config.watched_reasons, WatchedReasons::default());
        assert_eq!(config.fallbacks.len(), 2);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("NAMESPACE", "from-env");
        std::env::set_var("CHECK_INTERVAL", "45");

        let config = WatchdogConfig::from_env();

        std::env::remove_var("NAMESPACE");
        std::env::remove_var("CHECK_INTERVAL");

        assert_eq!(config.namespace, "from-env");
        assert_eq!(config.check_interval, Duration::from_secs(45));
    }
}
