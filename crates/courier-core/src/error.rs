//! Error types for courier-core
//!
//! None of these ever reach a fast-send caller: transport and storage
//! failures degrade to "retry later". They surface when building a
//! `Courier`, when loading configuration and when opening a file store.

use std::fmt::Write;
use thiserror::Error;

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested `(label, command)` pairs
    pub commands: Vec<(String, String)>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push((label.into(), command.into()));
        self
    }

    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for (label, command) in &self.commands {
                let _ = writeln!(output, "    - {label}: {command}");
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for courier-core
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Collector transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Storage(err) => Some(err.remediation()),
            Self::Transport(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
        }
    }
}

/// Durable store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Store I/O failed for {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to lock store {0}")]
    Lock(String),

    #[error("Store contents are not valid JSON: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Io { path, .. } => {
                Remediation::new(format!("Store file {path} could not be accessed."))
                    .command("Check permissions", format!("ls -l \"{path}\""))
                    .alternative("Point [storage].path at a writable location.")
            }
            Self::Lock(path) => Remediation::new("Another courier process holds the store lock.")
                .command("Find holder", format!("lsof \"{path}.lock\""))
                .alternative("Retry once the other process exits."),
            Self::Corrupt(_) => Remediation::new(
                "Store contents are unreadable. Affected maps are treated as empty.",
            )
            .alternative("Delete the store file to start from a clean state."),
            Self::Poisoned => {
                Remediation::new("A previous store writer panicked. Restart courier.")
            }
        }
    }
}

/// Collector transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request never produced a response (DNS, connect, TLS, reset)
    #[error("Network failure: {0}")]
    Network(String),

    /// Collector answered with a non-success status
    #[error("Collector returned HTTP {0}")]
    Status(u16),

    /// Response body was not the expected JSON
    #[error("Invalid collector response: {0}")]
    InvalidResponse(String),

    /// No way to dispatch the request from this context
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Network(_) | Self::Unavailable(_) => Remediation::new(
                "Collector unreachable. Queued events are retried on the next flush.",
            )
            .command("Retry now", "courier flush")
            .alternative("Check [collector].endpoint and network connectivity."),
            Self::Status(code) => {
                Remediation::new(format!("Collector rejected the request with HTTP {code}."))
                    .command("Inspect queue", "courier outbox")
            }
            Self::InvalidResponse(_) => {
                Remediation::new("Collector response was not JSON; the opaque fallback was used.")
                    .alternative("Verify the endpoint returns application/json.")
            }
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\"")),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the TOML syntax.")
                .alternative("Start again from `courier config --default`."),
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .alternative("Review [collector] and [dedup] in courier.toml.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_available_for_error_variants() {
        let errors = vec![
            Error::Storage(StorageError::Io {
                path: "/tmp/store.json".to_string(),
                reason: "denied".to_string(),
            }),
            Error::Storage(StorageError::Lock("/tmp/store.json".to_string())),
            Error::Storage(StorageError::Corrupt("eof".to_string())),
            Error::Storage(StorageError::Poisoned),
            Error::Transport(TransportError::Network("refused".to_string())),
            Error::Transport(TransportError::Status(502)),
            Error::Transport(TransportError::InvalidResponse("html".to_string())),
            Error::Transport(TransportError::Unavailable("no runtime".to_string())),
            Error::Config(ConfigError::FileNotFound("courier.toml".to_string())),
            Error::Config(ConfigError::ReadFailed(
                "courier.toml".to_string(),
                "denied".to_string(),
            )),
            Error::Config(ConfigError::ParseFailed("bad".to_string())),
            Error::Config(ConfigError::ValidationError("bad".to_string())),
        ];

        for err in errors {
            let remediation = err.remediation();
            assert!(remediation.is_some(), "missing remediation for {err:?}");
            assert!(!remediation.unwrap().summary.is_empty());
        }
    }

    #[test]
    fn formatted_error_includes_fix_section() {
        let err = Error::Transport(TransportError::Status(503));
        let rendered = format_error_with_remediation(&err);
        assert!(rendered.starts_with("Error: Transport error: Collector returned HTTP 503"));
        assert!(rendered.contains("To fix:"));
        assert!(rendered.contains("courier outbox"));
    }

    #[test]
    fn storage_error_points_at_the_store_path() {
        let err = Error::from(StorageError::Io {
            path: "/ro/store.json".to_string(),
            reason: "Permission denied".to_string(),
        });
        let rendered = format_error_with_remediation(&err);
        assert!(rendered.starts_with("Error: Storage error: Store I/O failed for /ro/store.json"));
        assert!(rendered.contains("[storage].path"));
    }
}
