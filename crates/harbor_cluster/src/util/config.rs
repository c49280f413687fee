//! Controller settings loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MAX_CONCURRENT_RECONCILIATION: u16 = 1;
pub const DEFAULT_ERROR_REQUEUE_SECS: u64 = 5 * 60;
pub const DEFAULT_THROTTLE_REQUEUE_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How many HarborClusters may be reconciled at the same time
    pub max_concurrent_reconciliation: u16,
    /// Requeue delay after a failed reconciliation
    pub error_requeue_secs: u64,
    /// Requeue delay after the API server throttled us
    pub throttle_requeue_secs: u64,
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciliation: DEFAULT_MAX_CONCURRENT_RECONCILIATION,
            error_requeue_secs: DEFAULT_ERROR_REQUEUE_SECS,
            throttle_requeue_secs: DEFAULT_THROTTLE_REQUEUE_SECS,
            log_format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_concurrent_reconciliation = parse_or_default(
            &lookup,
            "MAX_CONCURRENT_RECONCILIATION",
            defaults.max_concurrent_reconciliation,
        )
        .max(1);
        Self {
            max_concurrent_reconciliation,
            error_requeue_secs: parse_or_default(
                &lookup,
                "ERROR_REQUEUE_SECS",
                defaults.error_requeue_secs,
            ),
            throttle_requeue_secs: parse_or_default(
                &lookup,
                "THROTTLE_REQUEUE_SECS",
                defaults.throttle_requeue_secs,
            ),
            log_format: parse_or_default(&lookup, "LOG_FORMAT", defaults.log_format),
        }
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    pub fn throttle_requeue(&self) -> Duration {
        Duration::from_secs(self.throttle_requeue_secs)
    }
}

fn parse_or_default<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("ignoring invalid {key}={raw:?}: {e}");
                default
            }
        },
    }
}
