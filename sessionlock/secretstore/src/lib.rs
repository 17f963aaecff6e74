//! Platform secret storage for the sessionlock PIN record.
//!
//! The PIN record itself never lands in the keyring. Only a random
//! 256-bit wrapping key does; the record is sealed with it and written
//! next to the rest of the persisted security state.
//!
//! Two backends ship with the crate:
//! - [`KeyringSecretStore`]: OS keyring (Keychain, Credential Manager, Secret Service)
//! - [`MemorySecretStore`]: process memory, for headless hosts and tests

mod desktop;
mod error;
mod memory;
mod models;

pub use desktop::{KeyringSecretStore, DEFAULT_SERVICE_NAME};
pub use error::{Error, Result};
pub use memory::MemorySecretStore;
pub use models::*;

/// A place to keep one binary secret out of the regular data directory.
///
/// Implementations must be idempotent on delete and must report
/// [`Error::SecretNotFound`] when nothing has been stored yet.
pub trait SecretBackend: Send + Sync {
    /// Check what secure storage capabilities are available.
    fn check_availability(&self) -> Result<SecretStorageStatus>;

    /// Store (or replace) the secret.
    fn store_secret(&self, secret: &[u8]) -> Result<()>;

    /// Retrieve the stored secret.
    fn retrieve_secret(&self) -> Result<Vec<u8>>;

    /// Delete the secret. Succeeds when nothing is stored.
    fn delete_secret(&self) -> Result<()>;
}

/// Base64 encode bytes to string.
pub(crate) fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Base64 decode string to bytes.
pub(crate) fn base64_decode(encoded: &str) -> std::result::Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| e.to_string())
}
