//! Desktop implementation using the OS keyring.
//!
//! - **macOS**: Keychain Access
//! - **Windows**: Credential Manager
//! - **Linux**: Secret Service API (GNOME Keyring, KWallet)

use keyring::Entry;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::models::*;
use crate::{base64_decode, base64_encode, SecretBackend};

/// Default service name used for keyring entries.
pub const DEFAULT_SERVICE_NAME: &str = "com.sessionlock.pin";

/// Account name (username) for the keyring entry.
const ACCOUNT_NAME: &str = "pin-record-key";

/// Secret storage backed by the platform keyring.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    /// Create a store that keeps its entry under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> crate::Result<Entry> {
        Entry::new(&self.service, ACCOUNT_NAME).map_err(|e| {
            error!("Failed to create keyring entry: {}", e);
            Self::map_keyring_error(e)
        })
    }

    /// Get the appropriate storage method for the current platform.
    fn get_platform_method() -> SecretStorageMethod {
        #[cfg(target_os = "macos")]
        {
            SecretStorageMethod::MacOSKeychain
        }
        #[cfg(target_os = "windows")]
        {
            SecretStorageMethod::WindowsCredentialManager
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            SecretStorageMethod::LinuxSecretService
        }
    }

    /// Map keyring errors to our error type.
    fn map_keyring_error(err: keyring::Error) -> Error {
        match err {
            keyring::Error::NoEntry => Error::SecretNotFound,
            keyring::Error::Ambiguous(_) => {
                Error::Internal("Multiple keyring entries found".into())
            }
            keyring::Error::NoStorageAccess(e) => {
                Error::NotAvailable(format!("Keyring access denied: {:?}", e))
            }
            keyring::Error::PlatformFailure(e) => {
                Error::NotAvailable(format!("Keyring platform failure: {:?}", e))
            }
            keyring::Error::BadEncoding(_) => {
                Error::Internal("Keyring returned a non-UTF-8 value".into())
            }
            _ => Error::Internal(format!("Keyring error: {}", err)),
        }
    }
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl SecretBackend for KeyringSecretStore {
    /// Probe the keyring. A missing entry still counts as available.
    fn check_availability(&self) -> crate::Result<SecretStorageStatus> {
        debug!("Checking keyring availability for service: {}", self.service);

        let entry = match Entry::new(&self.service, ACCOUNT_NAME) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Keyring not available: {}", e);
                return Ok(SecretStorageStatus::unavailable(format!(
                    "OS keyring not available: {}",
                    e
                )));
            }
        };

        let method = Self::get_platform_method();
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => {
                debug!("Keyring available, method: {:?}", method);
                Ok(SecretStorageStatus::available(method))
            }
            Err(e) => {
                warn!("Keyring not accessible: {:?}", e);
                Ok(SecretStorageStatus::unavailable(format!(
                    "OS keyring not accessible: {}",
                    e
                )))
            }
        }
    }

    /// Store a secret as base64 text and read it back through a fresh entry.
    fn store_secret(&self, secret: &[u8]) -> crate::Result<()> {
        info!(
            "Storing {} byte secret in keyring (service: {})",
            secret.len(),
            self.service
        );

        let encoded = base64_encode(secret);
        self.entry()?.set_password(&encoded).map_err(|e| {
            error!("Failed to store secret in keyring: {:?}", e);
            Self::map_keyring_error(e)
        })?;

        // A new Entry avoids reading back a value cached by the first one.
        match self.entry()?.get_password() {
            Ok(readback) if readback == encoded => {
                debug!("Keyring secret verified after write");
                Ok(())
            }
            Ok(_) => {
                error!("Keyring verification failed - stored data doesn't match");
                Err(Error::Internal(
                    "Keyring verification failed: data mismatch".into(),
                ))
            }
            Err(e) => {
                error!("Keyring verification failed: {:?}", e);
                Err(Error::Internal(format!(
                    "Keyring verification failed: stored value not readable: {}",
                    e
                )))
            }
        }
    }

    fn retrieve_secret(&self) -> crate::Result<Vec<u8>> {
        debug!("Retrieving secret from keyring (service: {})", self.service);

        let encoded = self
            .entry()?
            .get_password()
            .map_err(Self::map_keyring_error)?;

        base64_decode(&encoded).map_err(|e| {
            error!("Failed to decode secret from base64: {}", e);
            Error::Internal(format!("Failed to decode secret: {}", e))
        })
    }

    fn delete_secret(&self) -> crate::Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => {
                info!("Secret deleted from OS keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!("No secret to delete (already gone)");
                Ok(())
            }
            Err(e) => {
                error!("Failed to delete secret from keyring: {:?}", e);
                Err(Self::map_keyring_error(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_no_entry_to_not_found() {
        let err = KeyringSecretStore::map_keyring_error(keyring::Error::NoEntry);
        assert!(matches!(err, Error::SecretNotFound));
    }

    #[test]
    fn test_default_service_name() {
        let store = KeyringSecretStore::default();
        assert_eq!(store.service, DEFAULT_SERVICE_NAME);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_uses_secret_service() {
        assert_eq!(
            KeyringSecretStore::get_platform_method(),
            SecretStorageMethod::LinuxSecretService
        );
    }
}
