use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// PBKDF2 iteration count for new PIN records.
pub const PIN_KDF_ITERATIONS: u32 = 100_000;

/// Length of the PBKDF2-HMAC-SHA512 output in bytes.
pub const PIN_KEY_SIZE: usize = 64;

/// Derive the PIN verifier with PBKDF2-HMAC-SHA512.
///
/// Deliberately slow; callers on an async runtime should run this on the
/// blocking pool.
pub fn derive_pin_key(pin: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; PIN_KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; PIN_KEY_SIZE]);
    pbkdf2_hmac::<Sha512>(pin.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Compare two secrets without an early exit on the first differing byte.
///
/// Slices of different length compare unequal; length is not secret here.
pub fn digests_match(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Fill a fixed-size array from the thread-local CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}
