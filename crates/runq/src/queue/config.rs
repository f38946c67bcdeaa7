//! Queue configuration

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::QueueError;
use crate::job::JobError;

/// Default number of concurrently running jobs per queue (or per shard)
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default time `stop` waits for the backlog to drain
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted shard count
pub const MAX_SHARDS: usize = 1024;

/// Callback receiving errors returned (or panics recovered) from jobs
pub type ErrorHandler = Arc<dyn Fn(JobError) + Send + Sync>;

/// Queue configuration
///
/// # Example
///
/// ```
/// use runq::QueueConfig;
/// use std::time::Duration;
///
/// let config = QueueConfig::new()
///     .with_concurrency(16)
///     .with_sharding(4)
///     .with_timeout(Duration::from_secs(5))
///     .with_recovery(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum concurrently running jobs (per shard when sharded)
    pub concurrency: usize,

    /// Requested shard count, rounded up to a power of two
    pub sharding: usize,

    /// How long `stop` waits for queued and running jobs
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Convert job panics into [`JobError::Panicked`]
    pub recovery: bool,

    /// Receives job errors; logged through `tracing` when unset
    #[serde(skip)]
    pub on_error: Option<ErrorHandler>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            sharding: 1,
            timeout: DEFAULT_TIMEOUT,
            recovery: false,
            on_error: None,
        }
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("concurrency", &self.concurrency)
            .field("sharding", &self.sharding)
            .field("timeout", &self.timeout)
            .field("recovery", &self.recovery)
            .field("on_error", &self.on_error.as_ref().map(|_| "<handler>"))
            .finish()
    }
}

impl QueueConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUNQ_CONCURRENCY`: Maximum running jobs per queue (default: 8)
    /// - `RUNQ_SHARDING`: Shard count, rounded up to a power of two (default: 1)
    /// - `RUNQ_TIMEOUT_MS`: Stop timeout in milliseconds (default: 30000)
    /// - `RUNQ_RECOVERY`: Recover job panics, `true` or `1` (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let concurrency = lookup("RUNQ_CONCURRENCY")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.concurrency);

        let sharding = lookup("RUNQ_SHARDING")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n <= MAX_SHARDS)
            .unwrap_or(defaults.sharding);

        let timeout = lookup("RUNQ_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout);

        let recovery = lookup("RUNQ_RECOVERY")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(defaults.recovery);

        Self {
            concurrency,
            sharding,
            timeout,
            recovery,
            on_error: None,
        }
    }

    /// Set maximum concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the requested shard count
    pub fn with_sharding(mut self, shards: usize) -> Self {
        self.sharding = shards;
        self
    }

    /// Set the stop timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable panic recovery
    pub fn with_recovery(mut self, recovery: bool) -> Self {
        self.recovery = recovery;
        self
    }

    /// Set the job error handler
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(JobError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Number of shards after rounding up to a power of two
    ///
    /// Capped at [`MAX_SHARDS`]; larger requests fail [`validate`](Self::validate).
    pub fn shard_count(&self) -> usize {
        self.sharding
            .max(1)
            .checked_next_power_of_two()
            .map_or(MAX_SHARDS, |n| n.min(MAX_SHARDS))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.sharding > MAX_SHARDS {
            return Err(QueueError::InvalidConfig(format!(
                "sharding must be at most {MAX_SHARDS}, got {}",
                self.sharding
            )));
        }
        if self.timeout.is_zero() {
            return Err(QueueError::InvalidConfig(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis())
            .map_err(|_| S::Error::custom("duration in milliseconds does not fit in u64"))?;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.sharding, 1);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(!config.recovery);
        assert!(config.on_error.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::new()
            .with_concurrency(0)
            .with_sharding(5)
            .with_timeout(Duration::from_millis(250))
            .with_recovery(true)
            .with_error_handler(|_| {});

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.sharding, 5);
        assert_eq!(config.shard_count(), 8);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert!(config.recovery);
        assert!(config.on_error.is_some());
    }

    #[test]
    fn test_shard_count_rounding() {
        let count = |n| QueueConfig::new().with_sharding(n).shard_count();
        assert_eq!(count(0), 1);
        assert_eq!(count(1), 1);
        assert_eq!(count(7), 8);
        assert_eq!(count(120), 128);
        assert_eq!(count(1024), 1024);
    }

    #[test]
    fn test_validation() {
        let mut config = QueueConfig::default();
        config.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(QueueError::InvalidConfig(_))
        ));

        let config = QueueConfig::new().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        assert!(QueueConfig::default().validate().is_ok());
    }

    #[test]
    fn test_serialization() {
        let config = QueueConfig::new()
            .with_concurrency(4)
            .with_timeout(Duration::from_millis(1500))
            .with_error_handler(|_| {});

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 1500);
        assert!(json.get("on_error").is_none());

        let parsed: QueueConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.concurrency, 4);
        assert_eq!(parsed.timeout, Duration::from_millis(1500));
        assert!(parsed.on_error.is_none());
    }

    #[test]
    fn test_oversized_sharding_is_rejected() {
        let parsed: QueueConfig =
            serde_json::from_str(r#"{"sharding": 18446744073709551615}"#).unwrap();

        assert_eq!(parsed.shard_count(), MAX_SHARDS);
        assert!(matches!(
            parsed.validate(),
            Err(QueueError::InvalidConfig(_))
        ));

        let config = QueueConfig::new().with_sharding(MAX_SHARDS + 1);
        assert!(config.validate().is_err());
        assert!(QueueConfig::new().with_sharding(MAX_SHARDS).validate().is_ok());
    }

    #[test]
    fn test_from_lookup_ignores_oversized_sharding() {
        for value in ["18446744073709551615", "1025"] {
            let config = QueueConfig::from_lookup(|key| match key {
                "RUNQ_SHARDING" => Some(value.to_string()),
                _ => None,
            });
            assert_eq!(config.sharding, 1);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_serialize_rejects_huge_timeout() {
        let config = QueueConfig::new().with_timeout(Duration::MAX);
        assert!(serde_json::to_value(&config).is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let parsed: QueueConfig = serde_json::from_str(r#"{"sharding": 4}"#).unwrap();
        assert_eq!(parsed.sharding, 4);
        assert_eq!(parsed.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(parsed.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("RUNQ_CONCURRENCY", "32"),
            ("RUNQ_SHARDING", "3"),
            ("RUNQ_TIMEOUT_MS", "100"),
            ("RUNQ_RECOVERY", "TRUE"),
        ]
        .into_iter()
        .collect();

        let config = QueueConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.concurrency, 32);
        assert_eq!(config.shard_count(), 4);
        assert_eq!(config.timeout, Duration::from_millis(100));
        assert!(config.recovery);
    }

    #[test]
    fn test_from_lookup_falls_back_on_garbage() {
        let config = QueueConfig::from_lookup(|key| match key {
            "RUNQ_CONCURRENCY" => Some("0".into()),
            "RUNQ_TIMEOUT_MS" => Some("soon".into()),
            "RUNQ_RECOVERY" => Some("yes".into()),
            _ => None,
        });
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(!config.recovery);
    }
}
