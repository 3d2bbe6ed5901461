//! Error types for vigil

use thiserror::Error;

/// Errors that can occur in the observability core
///
/// Only construction-time failures surface through this type. Steady-state
/// pipeline failures (a write that fails, a record that won't serialize) are
/// reported through `tracing` and swallowed — an observability outage must
/// never become a request-handling failure upstream.
#[derive(Debug, Error)]
pub enum VigilError {
    /// Invalid configuration value (fail fast at construction)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure during construction (e.g. log directory creation)
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Alert lookup by unknown id
    #[error("Alert not found: {0}")]
    AlertNotFound(String),
}

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
