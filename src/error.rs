//! Error types for conflux
//!
//! This module defines the error types used throughout the controller.
//! We use `thiserror` for the library error enum and `anyhow` for
//! propagation in the binary.

use crate::anchor::AnchorFault;
use thiserror::Error;

/// Main error type for conflux operations
#[derive(Error, Debug)]
pub enum ConfluxError {
    /// The anchor payload could not be written or the process failed to start
    #[error("Failed to spawn anchor: {0}")]
    SpawnFailed(String),

    /// The control channel to the anchor is not (or no longer) reachable
    #[error("Anchor transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The anchor rejected a call with a typed failure
    #[error("Anchor rejected request: {0}")]
    CapabilityRejected(#[from] AnchorFault),

    /// An OS service manager command exited unsuccessfully
    #[error("Service manager command `{command}` failed ({status}): {output}")]
    ServiceManagerFailure {
        /// The command line that was executed
        command: String,
        /// Exit status description
        status: String,
        /// Captured diagnostic output of the command
        output: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A lifecycle call was issued out of order
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Permission errors
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Guardian registration errors
    #[error("Registration error: {0}")]
    Registration(String),

    /// Local control socket errors
    #[error("Control API error: {0}")]
    Control(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type alias using ConfluxError
pub type Result<T> = std::result::Result<T, ConfluxError>;

impl From<serde_json::Error> for ConfluxError {
    fn from(err: serde_json::Error) -> Self {
        ConfluxError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ConfluxError {
    fn from(err: toml::de::Error) -> Self {
        ConfluxError::Config(err.to_string())
    }
}

impl ConfluxError {
    /// Whether the caller may retry the operation after a short wait
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfluxError::TransportUnavailable(_))
    }
}
