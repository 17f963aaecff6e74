//! Credential vault error types.
//!
//! Granular enough for programmatic handling, and convertible into the
//! crate-wide [`SessionLockError`](crate::error::SessionLockError) taxonomy.

use thiserror::Error;

use crate::error::SessionLockError;

/// Errors that can occur during credential vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The PIN is not 4-8 ASCII digits.
    #[error("Invalid PIN format: {0}")]
    InvalidPinFormat(String),

    /// No PIN record has been stored.
    #[error("PIN not set up")]
    NotSetup,

    /// The stored record exists but cannot be decoded.
    #[error("PIN record is corrupted: {0}")]
    Corrupted(String),

    /// Sealing or unsealing the record failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The platform secret store failed.
    #[error("Secret store error: {0}")]
    SecretStore(#[from] sessionlock_secretstore::Error),

    /// The keyring is unavailable and the weak fallback was not allowed.
    #[error("Platform secret storage unavailable and weak fallback disabled: {0}")]
    WeakStorageNotAllowed(String),

    /// Reading or writing the persisted state failed.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

impl From<SessionLockError> for VaultError {
    fn from(err: SessionLockError) -> Self {
        VaultError::Storage(err.to_string())
    }
}

// ============================================================================
// Conversions to the crate-wide error type
// ============================================================================

impl From<VaultError> for SessionLockError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InvalidPinFormat(msg) => SessionLockError::Validation(msg),
            VaultError::NotSetup => SessionLockError::NotConfigured,
            VaultError::Corrupted(msg) => {
                SessionLockError::Storage(format!("PIN record corrupted: {}", msg))
            }
            VaultError::Encryption(msg) => SessionLockError::Crypto(msg),
            VaultError::SecretStore(e) => {
                SessionLockError::Crypto(format!("Secret store: {}", e))
            }
            VaultError::WeakStorageNotAllowed(msg) => SessionLockError::Crypto(format!(
                "Secure storage unavailable and weak fallback disabled: {}",
                msg
            )),
            VaultError::Storage(msg) => SessionLockError::Storage(msg),
            VaultError::Serialization(e) => SessionLockError::Serialization(e),
        }
    }
}

impl serde::Serialize for VaultError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("VaultError", 2)?;

        let code = match self {
            VaultError::InvalidPinFormat(_) => "INVALID_PIN_FORMAT",
            VaultError::NotSetup => "NOT_SETUP",
            VaultError::Corrupted(_) => "CORRUPTED",
            VaultError::Encryption(_) => "ENCRYPTION_ERROR",
            VaultError::SecretStore(_) => "SECRET_STORE_ERROR",
            VaultError::WeakStorageNotAllowed(_) => "WEAK_STORAGE_NOT_ALLOWED",
            VaultError::Storage(_) => "STORAGE_ERROR",
            VaultError::Serialization(_) => "SERIALIZATION_ERROR",
        };

        state.serialize_field("code", code)?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_maps_to_validation() {
        let err: SessionLockError = VaultError::InvalidPinFormat("too short".into()).into();
        assert!(matches!(err, SessionLockError::Validation(_)));
    }

    #[test]
    fn test_weak_storage_maps_to_crypto() {
        let err: SessionLockError = VaultError::WeakStorageNotAllowed("no keyring".into()).into();
        assert!(matches!(err, SessionLockError::Crypto(_)));
    }

    #[test]
    fn test_vault_error_serialization() {
        let json = serde_json::to_string(&VaultError::NotSetup).unwrap();
        assert!(json.contains("NOT_SETUP"));
        assert!(json.contains("PIN not set up"));
    }
}
