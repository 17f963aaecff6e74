//! PIN credential storage.
//!
//! The PIN itself is never stored. A PBKDF2-HMAC-SHA512 verifier with a
//! per-record random salt is sealed and persisted under `security.pinData`:
//! - `PlatformKeyring`: AES-256-GCM under a random key held in the OS keyring
//! - `Base64Fallback`: reversible encoding, only when explicitly allowed

pub mod auth;
pub mod error;
pub mod manager;
pub mod record;
pub mod salt;

pub use auth::{LockState, StorageProtection};
pub use error::{VaultError, VaultResult};
pub use manager::{validate_pin, CredentialVault, MAX_PIN_LENGTH, MIN_PIN_LENGTH};
pub use record::{PinRecord, SealedPinData};
