//! Configuration management for console-web
//!
//! Handles loading and validation of `console-web.toml` files. Every section
//! and every field has a default, so an empty file is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::logging::{LogConfig, LogFormat};
use crate::retry::RetryPolicy;
use crate::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Where to find the instrumented process
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Completed-entity retention
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Which task lints run, and their thresholds
    #[serde(default)]
    pub lints: LintConfig,

    /// Reconnect backoff
    #[serde(default)]
    pub retry: RetryConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// `host:port` of the instrumented process's console feed
    #[serde(default = "default_target_addr")]
    pub target_addr: String,
    /// Give up on a TCP connect after this many milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target_addr: default_target_addr(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_target_addr() -> String {
    "127.0.0.1:6669".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Seconds a completed entity stays visible after it was dropped
    #[serde(default = "default_retain_for_secs")]
    pub retain_for_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retain_for_secs: default_retain_for_secs(),
        }
    }
}

fn default_retain_for_secs() -> u64 {
    6
}

/// Lint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LintConfig {
    #[serde(default = "default_true")]
    pub never_yielded: bool,

    /// Busy time a single-poll task must reach before it is flagged
    #[serde(default = "default_never_yielded_min_busy_ms")]
    pub never_yielded_min_busy_ms: u64,

    #[serde(default = "default_true")]
    pub lost_waker: bool,

    #[serde(default = "default_true")]
    pub self_wake_percent: bool,

    /// Self-wake share (percent of all wakes) above which a task is flagged
    #[serde(default = "default_self_wake_min_percent")]
    pub self_wake_min_percent: u64,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            never_yielded: true,
            never_yielded_min_busy_ms: default_never_yielded_min_busy_ms(),
            lost_waker: true,
            self_wake_percent: true,
            self_wake_min_percent: default_self_wake_min_percent(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_never_yielded_min_busy_ms() -> u64 {
    1000
}

fn default_self_wake_min_percent() -> u64 {
    50
}

/// Reconnect backoff configuration. Attempts are unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Random jitter as a fraction of the delay (0.1 = ±10%)
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_percent: default_jitter_percent(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_percent() -> f64 {
    0.1
}

impl Config {
    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.connection.target_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.target_addr must not be empty".into()).into());
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connection.connect_timeout_ms must be > 0".into()).into());
        }
        if self.general.log_level.parse::<crate::logging::LogLevel>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "general.log_level: unknown level {:?}",
                self.general.log_level
            ))
            .into());
        }
        if self.lints.self_wake_min_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "lints.self_wake_min_percent must be within 0..=100, got {}",
                self.lints.self_wake_min_percent
            ))
            .into());
        }
        if self.retry.backoff_factor.is_nan() || self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            ))
            .into());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_percent) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter_percent must be within 0.0..=1.0, got {}",
                self.retry.jitter_percent
            ))
            .into());
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            )
            .into());
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.general.log_level.clone(),
            format: self.general.log_format,
            file: self.general.log_file.clone(),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Grace period for completed entities.
    #[must_use]
    pub fn retain_for(&self) -> Duration {
        Duration::from_secs(i64::try_from(self.retention.retain_for_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.connection.target_addr, "127.0.0.1:6669");
        assert_eq!(config.connection.connect_timeout(), std::time::Duration::from_secs(5));
        assert_eq!(config.retention.retain_for_secs, 6);
        assert!(config.lints.never_yielded && config.lints.lost_waker);
        assert_eq!(config.lints.self_wake_min_percent, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_file_uses_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [connection]
            target_addr = "10.1.2.3:7000"

            [lints]
            lost_waker = false
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.target_addr, "10.1.2.3:7000");
        assert!(!config.lints.lost_waker);
        assert!(config.lints.never_yielded);
        assert_eq!(config.lints.never_yielded_min_busy_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn log_format_parses_lowercase() {
        let config = Config::from_toml_str("[general]\nlog_format = \"json\"").unwrap();
        assert_eq!(config.general.log_format, LogFormat::Json);
        assert_eq!(config.log_config().format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for text in [
            "[connection]\ntarget_addr = \"  \"",
            "[connection]\nconnect_timeout_ms = 0",
            "[general]\nlog_level = \"loud\"",
            "[lints]\nself_wake_min_percent = 101",
            "[retry]\nbackoff_factor = 0.5",
            "[retry]\njitter_percent = 1.5",
            "[retry]\ninitial_delay_ms = 5000\nmax_delay_ms = 10",
        ] {
            let err = Config::from_toml_str(text).unwrap_err();
            assert!(
                matches!(err, Error::Config(ConfigError::Invalid(_))),
                "{text}: {err}"
            );
        }
    }

    #[test]
    fn syntax_error_is_parse_error() {
        let err = Config::from_toml_str("[general").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retention]\nretain_for_secs = 30").unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.retain_for(), Duration::from_secs(30));
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Read(..))));
    }

    #[test]
    fn toml_output_reloads_identically() {
        let mut config = Config::default();
        config.lints.self_wake_min_percent = 75;
        config.general.log_file = Some(PathBuf::from("/tmp/console.log"));
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[connection]"));
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn retry_policy_is_unbounded() {
        let policy = Config::default().retry_policy();
        assert!(policy.max_attempts.is_none());
        assert_eq!(policy.initial_delay, std::time::Duration::from_millis(100));
        assert_eq!(policy.max_delay, std::time::Duration::from_secs(30));
    }
}
