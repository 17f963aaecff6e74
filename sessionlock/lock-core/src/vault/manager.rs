//! CredentialVault - PIN setup, verification and removal.
//!
//! Verification recomputes PBKDF2-HMAC-SHA512 with the stored salt and
//! iteration count and compares in constant time. The vault holds no lock
//! state of its own; attempt counting belongs to the lockout policy.

use std::sync::Arc;

use sessionlock_secretstore::{Error as SecretError, SecretBackend};
use tracing::{debug, info, warn};

use super::auth::StorageProtection;
use super::error::{VaultError, VaultResult};
use super::record::{open_record, seal_record, PinRecord, SealedPinData, WrappingKey};
use super::salt::generate_salt;
use crate::security::crypto::{derive_pin_key, digests_match};
use crate::storage::{keys, StateStore};

pub const MIN_PIN_LENGTH: usize = 4;
pub const MAX_PIN_LENGTH: usize = 8;

/// Check the public PIN rule: 4-8 ASCII digits.
pub fn validate_pin(pin: &str) -> VaultResult<()> {
    if pin.len() < MIN_PIN_LENGTH || pin.len() > MAX_PIN_LENGTH {
        return Err(VaultError::InvalidPinFormat(format!(
            "PIN must be {}-{} digits",
            MIN_PIN_LENGTH, MAX_PIN_LENGTH
        )));
    }
    if !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VaultError::InvalidPinFormat("PIN must contain only digits".into()));
    }
    Ok(())
}

/// Owns the persisted PIN record.
pub struct CredentialVault {
    store: Arc<StateStore>,
    secrets: Arc<dyn SecretBackend>,
    /// Permit the base64 fallback when the keyring is unavailable.
    allow_weak_storage: bool,
    /// Iteration count for newly created records.
    iterations: u32,
}

impl CredentialVault {
    pub fn new(
        store: Arc<StateStore>,
        secrets: Arc<dyn SecretBackend>,
        allow_weak_storage: bool,
        iterations: u32,
    ) -> Self {
        Self {
            store,
            secrets,
            allow_weak_storage,
            iterations: iterations.max(1),
        }
    }

    /// Whether a PIN record is stored.
    pub fn has_pin(&self) -> VaultResult<bool> {
        Ok(self.store.contains(keys::PIN_DATA)?)
    }

    /// How the current record is protected, if there is one.
    pub fn storage_protection(&self) -> VaultResult<Option<StorageProtection>> {
        Ok(self
            .store
            .get::<SealedPinData>(keys::PIN_DATA)?
            .map(|sealed| sealed.protection))
    }

    /// Create or replace the PIN record.
    ///
    /// The new record is written with a temp-file rename, so the previous
    /// record stays intact until the new one is complete. The caller is
    /// responsible for resetting attempt state.
    ///
    /// # Errors
    /// - `InvalidPinFormat` when the PIN breaks the 4-8 digit rule
    /// - `WeakStorageNotAllowed` / `SecretStore` when the keyring cannot be
    ///   used and the weak fallback is disabled
    /// - `Storage` when the record cannot be written
    pub fn set_pin(&self, pin: &str) -> VaultResult<StorageProtection> {
        let sealed = self.seal_pin(pin)?;
        self.store.set(keys::PIN_DATA, &sealed)?;
        info!("PIN record stored ({})", sealed.protection);
        Ok(sealed.protection)
    }

    /// Derive and seal a new record for `pin` without persisting it.
    ///
    /// Used when the record has to land in the same write as other state.
    /// An existing keyring key is reused, so the current record stays
    /// readable until the caller commits the new one.
    pub fn seal_pin(&self, pin: &str) -> VaultResult<SealedPinData> {
        validate_pin(pin)?;

        let salt = generate_salt();
        let derived = derive_pin_key(pin, &salt, self.iterations);
        let record = PinRecord::new(&salt, &derived[..], self.iterations);

        let key = self.wrapping_key_for_write()?;
        let sealed = seal_record(&record, key.as_ref())?;
        if sealed.protection.is_weak() {
            warn!("PIN record sealed with base64 fallback - platform keyring unavailable");
        }
        Ok(sealed)
    }

    /// Check `pin` against the stored record.
    ///
    /// Malformed PINs are rejected by the public length/charset rule without
    /// touching the record. Otherwise the full derivation always runs.
    pub fn verify_pin(&self, pin: &str) -> VaultResult<bool> {
        let record = self.load_record()?;
        if validate_pin(pin).is_err() {
            return Ok(false);
        }

        let derived = derive_pin_key(pin, &record.salt, record.iterations);
        let matches = digests_match(&derived[..], &record.derived_key);
        debug!("PIN verification completed");
        Ok(matches)
    }

    /// Delete the PIN record and its keyring key.
    ///
    /// Performs no authentication. Callers must have verified the current
    /// PIN (or be executing a confirmed destructive reset).
    pub fn remove_pin(&self) -> VaultResult<()> {
        let protection = self.storage_protection()?;
        self.store.remove(keys::PIN_DATA)?;
        info!("PIN record removed");

        if protection == Some(StorageProtection::PlatformKeyring) {
            self.release_wrapping_key();
        }
        Ok(())
    }

    /// Delete the keyring wrapping key. Call only after the record that
    /// used it has been removed from the store.
    pub fn release_wrapping_key(&self) {
        if let Err(e) = self.secrets.delete_secret() {
            // The record is already gone; an orphaned wrapping key unseals nothing.
            warn!("Failed to delete PIN wrapping key from keyring: {}", e);
        }
    }

    fn load_record(&self) -> VaultResult<PinRecord> {
        let sealed: SealedPinData = self
            .store
            .get(keys::PIN_DATA)?
            .ok_or(VaultError::NotSetup)?;

        let key = match sealed.protection {
            StorageProtection::PlatformKeyring => {
                Some(WrappingKey::from_slice(&self.secrets.retrieve_secret()?)?)
            }
            StorageProtection::Base64Fallback => None,
        };
        open_record(&sealed, key.as_ref())
    }

    /// Find the key to seal a new record with.
    ///
    /// Reuses an existing keyring key, creates one if none is stored, and
    /// returns `None` only when the weak fallback is allowed.
    fn wrapping_key_for_write(&self) -> VaultResult<Option<WrappingKey>> {
        let status = self.secrets.check_availability()?;
        if !status.available {
            let reason = status
                .unavailable_reason
                .unwrap_or_else(|| "unknown reason".into());
            return self.weak_fallback(reason);
        }

        match self.secrets.retrieve_secret() {
            Ok(bytes) => match WrappingKey::from_slice(&bytes) {
                Ok(key) => return Ok(Some(key)),
                Err(e) => warn!("Discarding malformed wrapping key: {}", e),
            },
            Err(SecretError::SecretNotFound) => {}
            Err(e) => return self.weak_fallback(e.to_string()),
        }

        let key = WrappingKey::generate();
        match self.secrets.store_secret(key.as_bytes()) {
            Ok(()) => Ok(Some(key)),
            Err(e) => self.weak_fallback(e.to_string()),
        }
    }

    fn weak_fallback(&self, reason: String) -> VaultResult<Option<WrappingKey>> {
        if self.allow_weak_storage {
            warn!("Platform keyring unusable ({}), using base64 fallback", reason);
            Ok(None)
        } else {
            Err(VaultError::WeakStorageNotAllowed(reason))
        }
    }
}
