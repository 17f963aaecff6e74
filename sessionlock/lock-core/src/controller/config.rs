use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sessionlock_secretstore::{KeyringSecretStore, SecretBackend, DEFAULT_SERVICE_NAME};

use crate::security::crypto::PIN_KDF_ITERATIONS;
use crate::security::Partition;

/// How long a destructive-reset confirmation token stays valid.
pub const DEFAULT_RESET_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Host-provided parameters for a [`LockController`](super::LockController).
///
/// User-editable preferences live in
/// [`SecuritySettings`](crate::storage::SecuritySettings) instead.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Directory holding `security-state.json`.
    pub data_dir: PathBuf,
    /// Session data destroyed by a wipe and covered by integrity checks.
    pub partitions: Vec<Partition>,
    pub keyring_service: String,
    /// Store the PIN record base64-only when no keyring is usable.
    pub allow_weak_pin_storage: bool,
    pub pin_kdf_iterations: u32,
    pub reset_token_ttl: Duration,
}

impl LockConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            partitions: Vec::new(),
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
            allow_weak_pin_storage: false,
            pin_kdf_iterations: PIN_KDF_ITERATIONS,
            reset_token_ttl: DEFAULT_RESET_TOKEN_TTL,
        }
    }

    pub fn with_partitions(mut self, partitions: impl IntoIterator<Item = Partition>) -> Self {
        self.partitions = partitions.into_iter().collect();
        self
    }

    pub fn allow_weak_pin_storage(mut self, allow: bool) -> Self {
        self.allow_weak_pin_storage = allow;
        self
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.pin_kdf_iterations = iterations.max(1);
        self
    }

    /// The OS keyring backend for this configuration's service name.
    pub fn keyring_backend(&self) -> Arc<dyn SecretBackend> {
        Arc::new(KeyringSecretStore::new(self.keyring_service.clone()))
    }
}
