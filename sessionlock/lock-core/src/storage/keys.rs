//! Key names in the persisted security state.
//!
//! Everything except `PIN_DATA` is non-sensitive and stored in plaintext.
//! `PIN_DATA` holds an opaque sealed blob (see `vault::record`).

pub const PIN_DATA: &str = "security.pinData";
pub const PIN_ENABLED: &str = "security.pinEnabled";
pub const FAILED_ATTEMPTS: &str = "security.failedAttempts";
pub const LAST_FAILED_ATTEMPT: &str = "security.lastFailedAttempt";
pub const LOCKOUT_UNTIL: &str = "security.lockoutUntil";
pub const AUTO_LOCK_ENABLED: &str = "security.autoLockEnabled";
pub const AUTO_LOCK_TIMEOUT: &str = "security.autoLockTimeout";
pub const AUTO_LOCK_ON_SUSPEND: &str = "security.autoLockOnSuspend";
pub const AUTO_LOCK_ON_SCREEN_LOCK: &str = "security.autoLockOnScreenLock";
pub const MAX_ATTEMPTS: &str = "security.maxAttempts";
pub const LOCKOUT_DURATION: &str = "security.lockoutDuration";
pub const DELETE_ON_MAX_ATTEMPTS: &str = "security.deleteOnMaxAttempts";
pub const SESSION_HASHES: &str = "security.sessionHashes";
