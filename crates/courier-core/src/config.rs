//! Configuration management for courier
//!
//! Handles loading and validation of `courier.toml`. Every section has
//! defaults, so an empty file (or no file at all) is a valid configuration
//! apart from the collector endpoint.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;

/// Default header carrying the idempotency key.
pub const DEFAULT_IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

const ONE_YEAR_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub inflight: InflightConfig,

    #[serde(default)]
    pub outbox: OutboxConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Collector endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// POST URL of the collector
    #[serde(default)]
    pub endpoint: String,

    /// Header carrying the idempotency key
    #[serde(default = "default_idempotency_header")]
    pub idempotency_header: String,

    /// Per-request timeout for awaited sends
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            idempotency_header: default_idempotency_header(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl CollectorConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_idempotency_header() -> String {
    DEFAULT_IDEMPOTENCY_HEADER.to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Suppression windows for the persistent dedup ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Window for login, test results and other ordinary events
    #[serde(default = "default_ordinary_window_ms")]
    pub ordinary_window_ms: u64,

    /// Window for registrations (identity-scoped, spans sessions)
    #[serde(default = "default_registration_window_ms")]
    pub registration_window_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ordinary_window_ms: default_ordinary_window_ms(),
            registration_window_ms: default_registration_window_ms(),
        }
    }
}

fn default_ordinary_window_ms() -> u64 {
    30_000
}

fn default_registration_window_ms() -> u64 {
    ONE_YEAR_MS
}

/// In-flight coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InflightConfig {
    /// How long a settled attempt keeps absorbing duplicate calls
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,
}

impl Default for InflightConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_ms: default_cleanup_delay_ms(),
        }
    }
}

impl InflightConfig {
    #[must_use]
    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

fn default_cleanup_delay_ms() -> u64 {
    500
}

/// Outbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Delay before the startup flush
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: default_flush_delay_ms(),
        }
    }
}

impl OutboxConfig {
    #[must_use]
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

fn default_flush_delay_ms() -> u64 {
    300
}

/// Durable store settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Store file path. Unset means the caller picks a location.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output for interactive use
    #[default]
    Pretty,
    /// JSON lines for machines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text without validating it.
    pub fn parse_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()).into())
    }

    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = Self::parse_toml_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a file without validating it. Commands that never
    /// reach the collector can run on a config with no endpoint.
    pub fn read(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display).into());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(display, e.to_string()))?;
        Self::parse_toml_str(&raw)
    }

    /// Load and validate configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()).into())
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.collector.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::ValidationError(
                "collector.endpoint must be set".to_string(),
            )
            .into());
        }
        let parsed = reqwest::Url::parse(endpoint).map_err(|e| {
            ConfigError::ValidationError(format!("collector.endpoint is not a URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "collector.endpoint must be http(s), got {}",
                parsed.scheme()
            ))
            .into());
        }
        if self.collector.idempotency_header.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "collector.idempotency_header must not be empty".to_string(),
            )
            .into());
        }
        if self.dedup.ordinary_window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dedup.ordinary_window_ms must be positive".to_string(),
            )
            .into());
        }
        if self.dedup.registration_window_ms < self.dedup.ordinary_window_ms {
            return Err(ConfigError::ValidationError(format!(
                "dedup.registration_window_ms ({}) must be >= dedup.ordinary_window_ms ({})",
                self.dedup.registration_window_ms, self.dedup.ordinary_window_ms
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const MINIMAL: &str = r#"
[collector]
endpoint = "https://collector.example.com/exec"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.collector.idempotency_header, "X-Idempotency-Key");
        assert_eq!(config.dedup.ordinary_window_ms, 30_000);
        assert_eq!(config.dedup.registration_window_ms, ONE_YEAR_MS);
        assert_eq!(config.inflight.cleanup_delay(), Duration::from_millis(500));
        assert_eq!(config.outbox.flush_delay(), Duration::from_millis(300));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let err = Config::from_toml_str("").unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::ValidationError(ref msg)) if msg.contains("endpoint")
        ));
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let err = Config::from_toml_str("[collector]\nendpoint = \"ftp://x.example\"\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ValidationError(_))));
    }

    #[test]
    fn registration_window_must_cover_ordinary_window() {
        let raw = format!(
            "{MINIMAL}\n[dedup]\nordinary_window_ms = 60000\nregistration_window_ms = 1000\n"
        );
        let err = Config::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("registration_window_ms"));
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = Config::from_toml_str("[collector\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here/courier.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn read_skips_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[outbox]\nflush_delay_ms = 10\n").unwrap();
        let config = Config::read(&path).unwrap();
        assert_eq!(config.outbox.flush_delay_ms, 10);
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.logging.format = LogFormat::Json;
        config.storage.path = Some(PathBuf::from("/tmp/courier.json"));
        let rendered = config.to_toml_string().unwrap();
        let back = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(back.logging.format, LogFormat::Json);
        assert_eq!(back.storage.path, config.storage.path);
    }
}
