use std::time::Duration;

use crate::provider::ProviderId;
use crate::task::{TaskId, TaskKind, TaskStatus};

/// How a failed provider call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying with backoff (timeouts, 429, 5xx, connection resets).
    Transient,
    /// Fails this sub-item only, no retry.
    Permanent,
    /// Halts the whole task (credentials, quota, unknown system).
    Fatal,
}

/// Errors returned by a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Daily quota exceeded ({used}/{max} requests)")]
    QuotaExceeded { used: u32, max: u32 },

    #[error("Game not found")]
    NotFound,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Provider is closed: {0}")]
    ServerClosed(String),

    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("System '{0}' is not known to this provider")]
    UnknownSystem(String),

    #[error("{provider} does not support {what}")]
    Unsupported { provider: ProviderId, what: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Classify the error for retry and task-halting decisions.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                    return FailureClass::Transient;
                }
                match e.status() {
                    Some(s) if s.is_server_error() || s.as_u16() == 429 => FailureClass::Transient,
                    Some(_) => FailureClass::Permanent,
                    None => FailureClass::Transient,
                }
            }
            Self::Timeout(_) | Self::RateLimited | Self::ServerError { .. } | Self::Io(_) => {
                FailureClass::Transient
            }
            Self::NotFound
            | Self::Rejected { .. }
            | Self::Malformed(_)
            | Self::Unsupported { .. }
            | Self::Json(_) => FailureClass::Permanent,
            Self::QuotaExceeded { .. }
            | Self::InvalidCredentials(_)
            | Self::ServerClosed(_)
            | Self::UnknownSystem(_)
            | Self::Config(_) => FailureClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::Fatal
    }
}

/// Errors returned by [`TaskManager`](crate::manager::TaskManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task scope is empty")]
    EmptyScope,

    #[error("Provider '{0}' is not configured")]
    UnknownProvider(ProviderId),

    #[error("Provider '{provider}' cannot run {kind} tasks")]
    UnsupportedKind { provider: ProviderId, kind: TaskKind },

    #[error("Task {id} is still {status}")]
    NotTerminal { id: TaskId, status: TaskStatus },

    #[error("Task log I/O error: {0}")]
    Log(#[from] std::io::Error),
}

/// Errors from the game-record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No record '{game}' for system '{system}'")]
    Missing { system: String, game: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the artwork generator.
#[derive(Debug, thiserror::Error)]
pub enum ArtworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artwork generation failed: {0}")]
    Render(String),
}

/// Errors loading orchestrator configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
