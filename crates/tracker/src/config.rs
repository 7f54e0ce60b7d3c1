use std::str::FromStr;
use std::time::Duration;

use clipwatch_core::estimation::{EstimatorConfig, DEFAULT_AVG_DURATION_SECS};
use clipwatch_core::validation::{default_expiry_rules, ExpiryRule};

use crate::poller::{DEFAULT_POLL_INTERVAL, DEFAULT_RETENTION};
use crate::store::DEFAULT_MAX_BYTES;

/// Default upper bound on blocking waits (10 minutes).
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 600;

/// Tracker configuration.
///
/// All fields have defaults matching the production provider; override
/// via environment variables.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Delay between status checks for one job (default: 3 s).
    pub poll_interval: Duration,
    /// How long a terminal snapshot stays readable after polling stops
    /// (default: 5 min).
    pub retention: Duration,
    /// Upper bound on run-and-block waits (default: 10 min).
    pub wait_timeout: Duration,
    /// Progress calibration, including the fallback average duration.
    pub estimator: EstimatorConfig,
    /// Byte budget of the persisted collection (default: 50 MiB).
    pub store_max_bytes: u64,
    /// Hosts whose result URLs expire.
    pub expiry_rules: Vec<ExpiryRule>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retention: DEFAULT_RETENTION,
            wait_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            estimator: EstimatorConfig::default(),
            store_max_bytes: DEFAULT_MAX_BYTES,
            expiry_rules: default_expiry_rules(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var             | Default    |
    /// |---------------------|------------|
    /// | `POLL_INTERVAL_MS`  | `3000`     |
    /// | `RETENTION_SECS`    | `300`      |
    /// | `WAIT_TIMEOUT_SECS` | `600`      |
    /// | `AVG_DURATION_SECS` | `390`      |
    /// | `STORE_MAX_BYTES`   | `52428800` |
    ///
    /// Malformed values are logged and replaced by the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll_interval_ms: u64 = env_or(
            "POLL_INTERVAL_MS",
            defaults.poll_interval.as_millis() as u64,
        );
        let retention_secs: u64 = env_or("RETENTION_SECS", defaults.retention.as_secs());
        let wait_timeout_secs: u64 = env_or("WAIT_TIMEOUT_SECS", DEFAULT_WAIT_TIMEOUT_SECS);
        let avg_duration_secs: f64 = env_or("AVG_DURATION_SECS", DEFAULT_AVG_DURATION_SECS);
        let store_max_bytes: u64 = env_or("STORE_MAX_BYTES", defaults.store_max_bytes);

        let estimator = EstimatorConfig {
            default_avg_duration_secs: avg_duration_secs,
            ..defaults.estimator
        };

        Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            retention: Duration::from_secs(retention_secs),
            wait_timeout: Duration::from_secs(wait_timeout_secs),
            estimator,
            store_max_bytes,
            expiry_rules: defaults.expiry_rules,
        }
    }
}

/// Read `key` from the environment, falling back to `default` when it is
/// unset or does not parse.
pub fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    parse_or(key, std::env::var(key).ok(), default)
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, default = %default, "Invalid config value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_value_uses_default() {
        assert_eq!(parse_or::<u64>("RETENTION_SECS", None, 300), 300);
    }

    #[test]
    fn malformed_value_uses_default() {
        assert_eq!(parse_or::<u64>("POLL_INTERVAL_MS", Some("fast".into()), 3000), 3000);
        assert_eq!(parse_or::<f64>("AVG_DURATION_SECS", Some("".into()), 390.0), 390.0);
    }

    #[test]
    fn valid_value_is_parsed() {
        assert_eq!(parse_or::<u64>("STORE_MAX_BYTES", Some(" 1024 ".into()), 0), 1024);
    }

    #[test]
    fn defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.retention, Duration::from_secs(300));
        assert_eq!(config.store_max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.estimator.default_avg_duration_secs, 390.0);
    }
}
