//! Client configuration.
//!
//! Configuration can be loaded from:
//! 1. A TOML file
//! 2. Environment variables (with `JOBWIRE_` prefix)
//!
//! Environment variables override TOML configuration, which overrides the
//! defaults.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [connection]
//! url = "ws://localhost:8080/ws"
//! connect_timeout_ms = 10000
//!
//! [dispatcher]
//! notice_delay_ms = 500
//!
//! [poller]
//! interval_ms = 1000
//! timeout_ms = 30000
//!
//! [logging]
//! level = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error message.
        error: String,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// An environment override had an unusable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// The rejected value.
        value: String,
    },
}

/// Top-level configuration for a jobwire client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Dispatcher notice policy.
    pub dispatcher: DispatcherConfig,
    /// Default poller bounds.
    pub poller: PollerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from TOML content without consulting the
    /// environment.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `JOBWIRE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognised keys:
    /// - `JOBWIRE_URL`
    /// - `JOBWIRE_CONNECT_TIMEOUT_MS`
    /// - `JOBWIRE_NOTICE_DELAY_MS`
    /// - `JOBWIRE_POLL_INTERVAL_MS`
    /// - `JOBWIRE_POLL_TIMEOUT_MS`
    /// - `JOBWIRE_LOG_LEVEL`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("JOBWIRE_URL") {
            self.connection.url = url;
        }
        if let Some(ms) = parse_millis(&lookup, "JOBWIRE_CONNECT_TIMEOUT_MS")? {
            self.connection.connect_timeout_ms = ms;
        }
        if let Some(ms) = parse_millis(&lookup, "JOBWIRE_NOTICE_DELAY_MS")? {
            self.dispatcher.notice_delay_ms = ms;
        }
        if let Some(ms) = parse_millis(&lookup, "JOBWIRE_POLL_INTERVAL_MS")? {
            self.poller.interval_ms = ms;
        }
        if let Some(ms) = parse_millis(&lookup, "JOBWIRE_POLL_TIMEOUT_MS")? {
            self.poller.timeout_ms = ms;
        }
        if let Some(level) = lookup("JOBWIRE_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Service URL (`ws://` or `wss://`).
    pub url: String,
    /// Upper bound on establishing the channel.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Dispatcher notice policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How long a job must run before the "started" notice appears.
    pub notice_delay_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            notice_delay_ms: 500,
        }
    }
}

impl DispatcherConfig {
    /// Notice delay as a [`Duration`].
    pub fn notice_delay(&self) -> Duration {
        Duration::from_millis(self.notice_delay_ms)
    }
}

/// Bounds for the convergence poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Wait before each attempt.
    pub interval_ms: u64,
    /// Give up once this much time has passed since the first attempt.
    pub timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            timeout_ms: 30_000,
        }
    }
}

impl PollerConfig {
    /// Build a config from durations.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Include the event target in each line.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.dispatcher.notice_delay(), Duration::from_millis(500));
        assert_eq!(config.poller.interval(), Duration::from_secs(1));
        assert_eq!(config.poller.timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            [connection]
            url = "wss://example.test/rpc"

            [dispatcher]
            notice_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.url, "wss://example.test/rpc");
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert_eq!(config.dispatcher.notice_delay_ms, 250);
        assert_eq!(config.poller, PollerConfig::default());
    }

    #[test]
    fn overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = [
            ("JOBWIRE_NOTICE_DELAY_MS", "50"),
            ("JOBWIRE_POLL_TIMEOUT_MS", "2000"),
            ("JOBWIRE_LOG_LEVEL", "jobwire=trace"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::from_toml("[dispatcher]\nnotice_delay_ms = 900").unwrap();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.dispatcher.notice_delay_ms, 50);
        assert_eq!(config.poller.timeout_ms, 2000);
        assert_eq!(config.logging.level, "jobwire=trace");
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_overrides(|key| (key == "JOBWIRE_POLL_INTERVAL_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("JOBWIRE_POLL_INTERVAL_MS"));
    }

    #[test]
    fn toml_round_trip() {
        let config = ClientConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(ClientConfig::from_toml(&text).unwrap(), config);
    }
}
