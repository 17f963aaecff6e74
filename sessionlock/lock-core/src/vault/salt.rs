//! Salt generation for PIN key derivation.
//!
//! Every PIN record gets its own 32-byte salt. Changing the PIN produces a
//! new salt, so identical PINs never share a verifier.

use crate::security::crypto::random_bytes;

/// Salt size in bytes (256 bits)
pub const SALT_SIZE: usize = 32;

/// Generate a fresh cryptographically random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    random_bytes::<SALT_SIZE>()
}
