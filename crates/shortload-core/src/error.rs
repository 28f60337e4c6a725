use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid run configuration. Always fatal, raised before any virtual user starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Scenario weights or read ratio are out of range or do not sum to 1.0.
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    /// Stage sequence is empty or has a zero total duration.
    #[error("invalid stages: {0}")]
    InvalidStages(String),

    /// Key pool sizes would break the fixed-width key format.
    #[error("invalid key pool: {0}")]
    InvalidKeyPool(String),

    /// Threshold selector or condition could not be parsed.
    #[error("invalid threshold `{expression}`: {message}")]
    InvalidThreshold {
        /// Offending selector or condition.
        expression: String,
        /// Human-readable parse failure.
        message: String,
    },

    /// Any other out-of-range value (timeouts, URLs, think time).
    #[error("invalid value for `{key}`: {message}")]
    InvalidValue {
        /// Dotted configuration key.
        key: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// Configuration source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),
}

impl ConfigError {
    /// Creates an `InvalidThreshold` variant.
    #[must_use]
    pub fn threshold(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidThreshold {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Creates an `InvalidValue` variant.
    #[must_use]
    pub fn value(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            message: message.into(),
        }
    }
}

/// Failure of a single request against the target. Recorded as a failed sample,
/// never retried.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The per-request timeout elapsed.
    #[error("request timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Connection, TLS or protocol failure.
    #[error("transport error after {elapsed:?}: {message}")]
    Transport { message: String, elapsed: Duration },

    /// The target answered with a status outside the expected set.
    #[error("unexpected status {status} after {elapsed:?}")]
    UnexpectedStatus {
        status: u16,
        cache_hit: Option<bool>,
        elapsed: Duration,
    },
}

impl RequestError {
    /// Time spent before the failure was observed.
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Timeout { elapsed }
            | Self::Transport { elapsed, .. }
            | Self::UnexpectedStatus { elapsed, .. } => *elapsed,
        }
    }

    /// Coarse classification used for error accounting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::UnexpectedStatus { status, .. } => ErrorKind::Status(*status),
        }
    }
}

/// Classification of a failed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Transport,
    Status(u16),
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
            Self::Status(status) => write!(f, "status {}", status),
        }
    }
}

/// Summarization over an empty metric scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    #[error("no samples recorded for {scope}")]
    NoSamples { scope: String },
}

/// Top-level error for a load run.
#[derive(Debug, Error)]
pub enum ShortloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP client could not be constructed.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),

    /// A virtual-user task panicked or was cancelled by the runtime.
    #[error("virtual user task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenient result alias for load runs.
pub type Result<T> = std::result::Result<T, ShortloadError>;
