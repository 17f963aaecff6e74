//! In-memory secret storage.
//!
//! Used by headless hosts and by tests in place of the OS keyring. It can
//! also be built in the "unavailable" state to exercise fallback paths.

use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::*;
use crate::SecretBackend;

/// Secret storage that lives in process memory only.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secret: Mutex<Option<Vec<u8>>>,
    unavailable: Option<String>,
}

impl MemorySecretStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that reports itself unavailable and refuses writes.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            secret: Mutex::new(None),
            unavailable: Some(reason.into()),
        }
    }

    /// Whether a secret is currently held.
    pub fn is_populated(&self) -> bool {
        self.secret.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn ensure_available(&self) -> Result<()> {
        match &self.unavailable {
            Some(reason) => Err(Error::NotAvailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Vec<u8>>>> {
        self.secret
            .lock()
            .map_err(|_| Error::Internal("Memory secret store lock poisoned".into()))
    }
}

impl SecretBackend for MemorySecretStore {
    fn check_availability(&self) -> Result<SecretStorageStatus> {
        Ok(match &self.unavailable {
            Some(reason) => SecretStorageStatus::unavailable(reason.clone()),
            None => SecretStorageStatus::available(SecretStorageMethod::InMemory),
        })
    }

    fn store_secret(&self, secret: &[u8]) -> Result<()> {
        self.ensure_available()?;
        *self.slot()? = Some(secret.to_vec());
        debug!("Stored {} byte secret in memory", secret.len());
        Ok(())
    }

    fn retrieve_secret(&self) -> Result<Vec<u8>> {
        self.ensure_available()?;
        self.slot()?.clone().ok_or(Error::SecretNotFound)
    }

    fn delete_secret(&self) -> Result<()> {
        self.ensure_available()?;
        *self.slot()? = None;
        Ok(())
    }
}
