use thiserror::Error;

use crate::security::EraseError;

/// Errors surfaced by the lock subsystem to its host.
///
/// Policy rejections (`InvalidPin`, `RetryLater`, `LockedOut`) are not faults;
/// they carry the numbers the host needs to render a countdown.
#[derive(Error, Debug)]
pub enum SessionLockError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Incorrect PIN, {remaining_attempts} attempts remaining")]
    InvalidPin {
        remaining_attempts: u32,
        retry_after_secs: u64,
    },

    #[error("Too many attempts, retry in {retry_after_secs}s")]
    RetryLater { retry_after_secs: u64 },

    #[error("The session is locked")]
    Locked,

    #[error("Locked out for another {remaining_secs}s")]
    LockedOut { remaining_secs: u64 },

    #[error("Protected data was wiped after too many failed attempts")]
    Wiped,

    #[error("A wipe is in progress")]
    Wiping,

    #[error("Secure erase failed: {0}")]
    Erase(#[from] EraseError),

    #[error("No PIN configured")]
    NotConfigured,

    #[error("A PIN is already configured")]
    AlreadyConfigured,

    #[error("Destructive reset was not confirmed")]
    ResetNotConfirmed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionLockError {
    /// Stable error code for programmatic handling by the host UI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Crypto(_) => "CRYPTO_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::InvalidPin { .. } => "INVALID_PIN",
            Self::RetryLater { .. } => "RETRY_LATER",
            Self::Locked => "LOCKED",
            Self::LockedOut { .. } => "LOCKED_OUT",
            Self::Wiped => "WIPED",
            Self::Wiping => "WIPING",
            Self::Erase(_) => "ERASE_ERROR",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::AlreadyConfigured => "ALREADY_CONFIGURED",
            Self::ResetNotConfirmed => "RESET_NOT_CONFIRMED",
            Self::Serialization(_) => "STORAGE_ERROR",
            Self::Io(_) => "STORAGE_ERROR",
        }
    }
}

impl serde::Serialize for SessionLockError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("SessionLockError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, SessionLockError>;
