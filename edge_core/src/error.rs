//! Unified error handling for the edge extractor core.
//!
//! One error enum for the whole supervision core, following the same
//! per-kind-variant + helper-constructor shape used throughout the crate's
//! components.

use thiserror::Error;

/// Main error type for edge_core operations.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// I/O related errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Camera model has no registered driver.
    #[error("unsupported camera model: {0}")]
    UnsupportedModel(String),

    /// Driver-level errors (connect, fetch, subscribe).
    #[error("Driver error: {0}")]
    Driver(String),

    /// Errors surfaced while talking to the remote data platform.
    #[error("Platform error: {0}")]
    Platform(String),

    /// Secret store errors.
    #[error("Secret error: {0}")]
    Secret(String),

    /// Serialization/Deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout errors.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Resource not found errors.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic internal errors (use sparingly).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Catch-all for other error types.
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using EdgeError.
pub type EdgeResult<T> = Result<T, EdgeError>;

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        EdgeError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EdgeError {
    fn from(err: serde_yaml::Error) -> Self {
        EdgeError::Serialization(format!("YAML error: {err}"))
    }
}

impl From<toml::de::Error> for EdgeError {
    fn from(err: toml::de::Error) -> Self {
        EdgeError::Config(format!("TOML parse error: {err}"))
    }
}

impl<T> From<std::sync::PoisonError<T>> for EdgeError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        EdgeError::Internal("lock poisoned".to_string())
    }
}

impl From<anyhow::Error> for EdgeError {
    fn from(err: anyhow::Error) -> Self {
        EdgeError::Other(err.to_string())
    }
}

impl From<&str> for EdgeError {
    fn from(msg: &str) -> Self {
        EdgeError::Other(msg.to_string())
    }
}

impl From<String> for EdgeError {
    fn from(msg: String) -> Self {
        EdgeError::Other(msg)
    }
}

impl EdgeError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        EdgeError::Config(msg.into())
    }

    pub fn driver<S: Into<String>>(msg: S) -> Self {
        EdgeError::Driver(msg.into())
    }

    pub fn platform<S: Into<String>>(msg: S) -> Self {
        EdgeError::Platform(msg.into())
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        EdgeError::NotFound(resource.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        EdgeError::InvalidInput(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EdgeError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EdgeError::Timeout(_))
    }
}
