//! Error types for the discovery system
//!
//! This module defines all error types used throughout the workspace.

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the discovery system
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client errors (from inventory APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Credential resolution errors
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Upstream response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Malformed monitoring endpoint declaration
    #[error("Invalid endpoint declaration {value:?}: {reason}")]
    InvalidEndpoint {
        /// The raw declared value
        value: String,
        /// Which rule the value violates
        reason: String,
    },

    /// A task does not expose the requested port
    #[error("Task {task_id} has no port at index {index} ({available} ports declared)")]
    PortIndex {
        /// Task identifier
        task_id: String,
        /// Requested port index
        index: usize,
        /// Number of ports the task actually has
        available: usize,
    },

    /// Discoverer-specific error
    #[error("Discoverer error ({mechanism}): {message}")]
    Discoverer {
        /// Discovery mechanism name
        mechanism: String,
        /// Error message
        message: String,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a credentials error
    pub fn credentials(msg: impl Into<String>) -> Self {
        Self::Credentials(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an invalid endpoint declaration error
    pub fn invalid_endpoint(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a discoverer-specific error
    pub fn discoverer(mechanism: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discoverer {
            mechanism: mechanism.into(),
            message: message.into(),
        }
    }
}
