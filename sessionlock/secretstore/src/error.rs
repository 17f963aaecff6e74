//! Error types for the secret store.

use serde::{Deserialize, Serialize};

/// Result type alias for secret store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during secret storage operations.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "message")]
pub enum Error {
    /// Secure storage is not available on this platform/device.
    #[error("Secure storage not available: {0}")]
    NotAvailable(String),

    /// No secret is stored (nothing to retrieve).
    #[error("No secret found in secure storage")]
    SecretNotFound,

    /// Access to secure storage was denied by the OS.
    #[error("Access denied to secure storage")]
    AccessDenied,

    /// I/O error during keyring operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Platform-specific internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
