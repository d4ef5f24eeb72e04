//! Suite configuration
//!
//! One immutable [`SuiteConfig`] is built at startup and shared by reference.
//! Build it programmatically, or from key/value pairs with
//! [`SuiteConfig::from_pairs`]; [`SuiteConfig::from_env`] feeds it the process
//! environment.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use virtwait::config::{timeouts, SuiteConfig};
//!
//! let config = SuiteConfig::new()
//!     .namespace_prefix("net-e2e")
//!     .wait_timeout(timeouts::TIMEOUT_4MIN)
//!     .poll_interval(Duration::from_secs(5));
//!
//! let from_pairs = SuiteConfig::from_pairs([("VIRTWAIT_WAIT_TIMEOUT", "90s")]).unwrap();
//! assert_eq!(from_pairs.wait_timeout, Duration::from_secs(90));
//! ```

use std::time::Duration;

/// Standard timeouts used across the suite
pub mod timeouts {
    use std::time::Duration;

    pub const TIMEOUT_1SEC: Duration = Duration::from_secs(1);
    pub const TIMEOUT_5SEC: Duration = Duration::from_secs(5);
    pub const TIMEOUT_10SEC: Duration = Duration::from_secs(10);
    pub const TIMEOUT_30SEC: Duration = Duration::from_secs(30);
    pub const TIMEOUT_1MIN: Duration = Duration::from_secs(60);
    pub const TIMEOUT_2MIN: Duration = Duration::from_secs(2 * 60);
    pub const TIMEOUT_3MIN: Duration = Duration::from_secs(3 * 60);
    pub const TIMEOUT_4MIN: Duration = Duration::from_secs(4 * 60);
    pub const TIMEOUT_5MIN: Duration = Duration::from_secs(5 * 60);
    pub const TIMEOUT_10MIN: Duration = Duration::from_secs(10 * 60);
    pub const TIMEOUT_15MIN: Duration = Duration::from_secs(15 * 60);
    pub const TIMEOUT_20MIN: Duration = Duration::from_secs(20 * 60);
    pub const TIMEOUT_30MIN: Duration = Duration::from_secs(30 * 60);
    pub const TIMEOUT_60MIN: Duration = Duration::from_secs(60 * 60);
}

/// Errors from building a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Configuration shared by every wait and scoped resource of a run
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteConfig {
    /// Prefix of generated test namespaces
    pub namespace_prefix: String,

    /// Never delete test namespaces
    pub keep_all: bool,

    /// Keep the test namespace when the test fails
    pub keep_on_failure: bool,

    /// Default budget for readiness waits
    pub wait_timeout: Duration,

    /// Default budget for deletion waits
    pub delete_timeout: Duration,

    /// Default pause between polls
    pub poll_interval: Duration,

    /// Field manager for server-side apply
    pub field_manager: String,

    /// Prometheus (or Thanos querier) base URL
    pub prometheus_url: Option<String>,

    /// Bearer token for Prometheus
    pub prometheus_token: Option<String>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "virtwait-test".to_string(),
            keep_all: false,
            keep_on_failure: false,
            wait_timeout: timeouts::TIMEOUT_2MIN,
            delete_timeout: timeouts::TIMEOUT_4MIN,
            poll_interval: Duration::from_secs(1),
            field_manager: "virtwait".to_string(),
            prometheus_url: None,
            prometheus_token: None,
        }
    }
}

impl SuiteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs
    ///
    /// Recognised keys: `VIRTWAIT_NAMESPACE_PREFIX`, `VIRTWAIT_KEEP_ALL`,
    /// `VIRTWAIT_KEEP_ON_FAILURE`, `VIRTWAIT_WAIT_TIMEOUT`,
    /// `VIRTWAIT_DELETE_TIMEOUT`, `VIRTWAIT_POLL_INTERVAL`,
    /// `VIRTWAIT_FIELD_MANAGER`, `PROMETHEUS_URL`, `PROMETHEUS_TOKEN`.
    /// Unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "VIRTWAIT_NAMESPACE_PREFIX" => config.namespace_prefix = value.to_string(),
                "VIRTWAIT_KEEP_ALL" => config.keep_all = parse_flag(key, value)?,
                "VIRTWAIT_KEEP_ON_FAILURE" => config.keep_on_failure = parse_flag(key, value)?,
                "VIRTWAIT_WAIT_TIMEOUT" => config.wait_timeout = parse_duration(key, value)?,
                "VIRTWAIT_DELETE_TIMEOUT" => config.delete_timeout = parse_duration(key, value)?,
                "VIRTWAIT_POLL_INTERVAL" => config.poll_interval = parse_duration(key, value)?,
                "VIRTWAIT_FIELD_MANAGER" => config.field_manager = value.to_string(),
                "PROMETHEUS_URL" => config.prometheus_url = Some(value.to_string()),
                "PROMETHEUS_TOKEN" => config.prometheus_token = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(config)
    }

    /// Build from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_pairs(std::env::vars())
    }

    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    pub fn keep_all(mut self, keep: bool) -> Self {
        self.keep_all = keep;
        self
    }

    pub fn keep_on_failure(mut self, keep: bool) -> Self {
        self.keep_on_failure = keep;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }

    pub fn prometheus(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.prometheus_url = Some(url.into());
        self.prometheus_token = token;
        self
    }

    /// Whether the namespace of a finished test should be deleted
    pub fn should_cleanup(&self, test_passed: bool) -> bool {
        !(self.keep_all || (!test_passed && self.keep_on_failure))
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

/// Parse `90`, `90s`, `500ms`, `2m` or `1h`
pub fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| invalid(key, value, "expected a number with optional unit"))?;

    let secs = match unit {
        "ms" => return Ok(Duration::from_millis(amount)),
        "" | "s" => Some(amount),
        "m" => amount.checked_mul(60),
        "h" => amount.checked_mul(3600),
        _ => return Err(invalid(key, value, "unknown unit, use ms, s, m or h")),
    };

    secs.map(Duration::from_secs)
        .ok_or_else(|| invalid(key, value, "duration too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SuiteConfig::default();
        assert_eq!(config.namespace_prefix, "virtwait-test");
        assert_eq!(config.wait_timeout, timeouts::TIMEOUT_2MIN);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.prometheus_url.is_none());
    }

    #[test]
    fn test_builder() {
        let config = SuiteConfig::new()
            .namespace_prefix("storage-e2e")
            .keep_on_failure(true)
            .wait_timeout(timeouts::TIMEOUT_10MIN)
            .prometheus("https://thanos-querier:9091", Some("token".to_string()));

        assert_eq!(config.namespace_prefix, "storage-e2e");
        assert!(config.keep_on_failure);
        assert_eq!(config.wait_timeout, Duration::from_secs(600));
        assert_eq!(config.prometheus_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_from_pairs() {
        let config = SuiteConfig::from_pairs([
            ("VIRTWAIT_NAMESPACE_PREFIX", "net"),
            ("VIRTWAIT_KEEP_ON_FAILURE", "true"),
            ("VIRTWAIT_WAIT_TIMEOUT", "5m"),
            ("VIRTWAIT_POLL_INTERVAL", "500ms"),
            ("PROMETHEUS_URL", "http://localhost:9090"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert_eq!(config.namespace_prefix, "net");
        assert!(config.keep_on_failure);
        assert!(!config.keep_all);
        assert_eq!(config.wait_timeout, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.prometheus_url.as_deref(), Some("http://localhost:9090"));
    }

    #[test]
    fn test_from_pairs_rejects_bad_values() {
        let err = SuiteConfig::from_pairs([("VIRTWAIT_WAIT_TIMEOUT", "soon")]).unwrap_err();
        assert!(err.to_string().contains("VIRTWAIT_WAIT_TIMEOUT"));

        let err = SuiteConfig::from_pairs([("VIRTWAIT_KEEP_ALL", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("boolean"));

        assert!(parse_duration("k", "10d").is_err());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("k", "90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("k", "90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("k", "2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("k", "1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("k", " 250ms ").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        let err = parse_duration("VIRTWAIT_WAIT_TIMEOUT", "999999999999999999m").unwrap_err();
        assert!(err.to_string().contains("duration too large"));
        assert!(parse_duration("k", "18446744073709551615h").is_err());

        let err = SuiteConfig::from_pairs([("VIRTWAIT_DELETE_TIMEOUT", "99999999999999999h")])
            .unwrap_err();
        assert!(err.to_string().contains("VIRTWAIT_DELETE_TIMEOUT"));
    }

    #[test]
    fn test_should_cleanup() {
        let default = SuiteConfig::default();
        assert!(default.should_cleanup(true));
        assert!(default.should_cleanup(false));

        let keep_failed = SuiteConfig::default().keep_on_failure(true);
        assert!(keep_failed.should_cleanup(true));
        assert!(!keep_failed.should_cleanup(false));

        let keep_all = SuiteConfig::default().keep_all(true);
        assert!(!keep_all.should_cleanup(true));
    }
}
