//! Error types for the RSVP alert job.

use thiserror::Error;

/// Errors that can occur while draining, reconciling or dispatching alerts.
#[derive(Debug, Error)]
pub enum AlertError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blob or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Digest template could not be compiled or rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Mail transport rejected a message
    #[error("Email delivery failed: {0}")]
    Email(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl AlertError {
    /// Whether this error means the requested key is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AlertError>;
