//! PIN record format and at-rest sealing.
//!
//! - `PinRecord`: salt, PBKDF2 output, algorithm tag and iteration count
//! - `WrappingKey`: 256-bit keyring-held key, zeroized on drop
//! - `SealedPinData`: what actually lands under `security.pinData`
//!
//! Keyring-sealed payload format: `base64([12-byte nonce][ciphertext + 16-byte tag])`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::auth::StorageProtection;
use super::error::{VaultError, VaultResult};
use crate::security::crypto::random_bytes;

/// Algorithm tag stored with every record.
pub const PIN_ALGORITHM: &str = "pbkdf2-hmac-sha512";

/// Nonce size for AES-GCM (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;

/// Wrapping key size (AES-256).
pub const WRAPPING_KEY_SIZE: usize = 32;

/// A persisted PIN verifier.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    #[serde(with = "hex")]
    pub derived_key: Vec<u8>,
    pub algorithm: String,
    pub iterations: u32,
}

impl PinRecord {
    pub fn new(salt: &[u8], derived_key: &[u8], iterations: u32) -> Self {
        Self {
            salt: salt.to_vec(),
            derived_key: derived_key.to_vec(),
            algorithm: PIN_ALGORITHM.to_string(),
            iterations,
        }
    }
}

impl std::fmt::Debug for PinRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinRecord")
            .field("salt", &"[REDACTED]")
            .field("derived_key", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("iterations", &self.iterations)
            .finish()
    }
}

/// A 256-bit key that seals the PIN record, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey {
    key: [u8; WRAPPING_KEY_SIZE],
}

impl WrappingKey {
    pub fn generate() -> Self {
        Self {
            key: random_bytes::<WRAPPING_KEY_SIZE>(),
        }
    }

    /// Rebuild a key from bytes read back out of the keyring.
    pub fn from_slice(slice: &[u8]) -> VaultResult<Self> {
        if slice.len() != WRAPPING_KEY_SIZE {
            return Err(VaultError::Encryption(format!(
                "Wrapping key must be {} bytes, got {}",
                WRAPPING_KEY_SIZE,
                slice.len()
            )));
        }
        let mut key = [0u8; WRAPPING_KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; WRAPPING_KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the actual key material
        f.debug_struct("WrappingKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// The opaque blob stored under `security.pinData`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedPinData {
    pub protection: StorageProtection,
    pub payload: String,
}

/// Seal `record` under `key`, or base64-encode it when `key` is `None`.
pub fn seal_record(record: &PinRecord, key: Option<&WrappingKey>) -> VaultResult<SealedPinData> {
    let plaintext = Zeroizing::new(serde_json::to_vec(record)?);
    let engine = base64::engine::general_purpose::STANDARD;

    let Some(key) = key else {
        return Ok(SealedPinData {
            protection: StorageProtection::Base64Fallback,
            payload: engine.encode(plaintext.as_slice()),
        });
    };

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(format!("Invalid key: {}", e)))?;

    let nonce_bytes = random_bytes::<NONCE_SIZE>();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|e| VaultError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut output = nonce_bytes.to_vec();
    output.extend(ciphertext);

    Ok(SealedPinData {
        protection: StorageProtection::PlatformKeyring,
        payload: engine.encode(output),
    })
}

/// Reverse [`seal_record`].
///
/// A keyring-sealed record needs the same key it was sealed with.
pub fn open_record(sealed: &SealedPinData, key: Option<&WrappingKey>) -> VaultResult<PinRecord> {
    let engine = base64::engine::general_purpose::STANDARD;
    let raw = Zeroizing::new(
        engine
            .decode(&sealed.payload)
            .map_err(|e| VaultError::Corrupted(format!("Payload is not base64: {}", e)))?,
    );

    let plaintext = match sealed.protection {
        StorageProtection::Base64Fallback => raw,
        StorageProtection::PlatformKeyring => {
            let key = key.ok_or_else(|| {
                VaultError::Encryption("Record is keyring-sealed but no key is available".into())
            })?;

            if raw.len() < NONCE_SIZE {
                return Err(VaultError::Corrupted("Sealed record too short".into()));
            }

            let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
            let nonce = Nonce::from_slice(nonce_bytes);

            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| VaultError::Encryption(format!("Invalid key: {}", e)))?;

            // Failure here means the keyring key no longer matches the record.
            Zeroizing::new(cipher.decrypt(nonce, ciphertext).map_err(|_| {
                VaultError::Encryption("Failed to unseal PIN record".into())
            })?)
        }
    };

    let record: PinRecord = serde_json::from_slice(&plaintext)
        .map_err(|e| VaultError::Corrupted(format!("Record does not parse: {}", e)))?;

    if record.algorithm != PIN_ALGORITHM {
        return Err(VaultError::Corrupted(format!(
            "Unsupported algorithm: {}",
            record.algorithm
        )));
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> PinRecord {
        PinRecord::new(&[3u8; 32], &[9u8; 64], 1_000)
    }

    #[test]
    fn test_keyring_sealed_payload_hides_record() {
        let key = WrappingKey::generate();
        let sealed = seal_record(&sample_record(), Some(&key)).unwrap();
        assert_eq!(sealed.protection, StorageProtection::PlatformKeyring);
        assert!(
            !sealed.payload.contains(&hex::encode([9u8; 64])),
            "Sealed payload must not contain the verifier"
        );

        let opened = open_record(&sealed, Some(&key)).unwrap();
        assert_eq!(opened.derived_key, vec![9u8; 64]);
        assert_eq!(opened.iterations, 1_000);
    }

    #[test]
    fn test_wrong_key_fails_to_open() {
        let sealed = seal_record(&sample_record(), Some(&WrappingKey::generate())).unwrap();
        let err = open_record(&sealed, Some(&WrappingKey::generate())).unwrap_err();
        assert!(matches!(err, VaultError::Encryption(_)));
    }

    #[test]
    fn test_fallback_is_flagged_weak() {
        let sealed = seal_record(&sample_record(), None).unwrap();
        assert!(sealed.protection.is_weak());
        assert_eq!(open_record(&sealed, None).unwrap().salt, vec![3u8; 32]);
    }

    #[test]
    fn test_unknown_algorithm_is_corrupted() {
        let mut record = sample_record();
        record.algorithm = "md5".into();
        let sealed = seal_record(&record, None).unwrap();
        assert!(matches!(
            open_record(&sealed, None),
            Err(VaultError::Corrupted(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?} {:?}", sample_record(), WrappingKey::generate());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("9, 9"));
    }
}
