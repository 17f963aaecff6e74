//! Lock state and storage-protection types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether protected content may currently be shown.
///
/// The subsystem moves between these states:
/// - `AwaitingSetup` → `Unlocked` (after the first PIN is set)
/// - `Unlocked` → `Locked` (manual lock, inactivity, suspend, screen lock)
/// - `Locked` → `Unlocked` (correct PIN)
/// - `Locked` → `LockedOut` (too many failures) → `Locked` (lockout elapsed)
/// - any → `Wiping` (paranoia mode or confirmed reset; terminal for the session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LockState {
    /// Content is visible. Also the state when PIN protection is disabled.
    Unlocked,
    /// PIN required.
    Locked,
    /// PIN attempts are refused until `until`.
    LockedOut { until: DateTime<Utc> },
    /// PIN protection is enabled but no PIN has been set.
    AwaitingSetup,
    /// Protected data is being (or has been) destroyed.
    Wiping,
}

impl LockState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked)
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlocked => write!(f, "Unlocked"),
            Self::Locked => write!(f, "Locked"),
            Self::LockedOut { until } => write!(f, "LockedOut(until {})", until.to_rfc3339()),
            Self::AwaitingSetup => write!(f, "AwaitingSetup"),
            Self::Wiping => write!(f, "Wiping"),
        }
    }
}

/// How the persisted PIN record is protected at rest.
///
/// Returned from PIN setup so the host can tell the user when only the
/// weaker fallback was available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProtection {
    /// Sealed with AES-256-GCM under a key held in the platform keyring.
    PlatformKeyring,
    /// Base64 only. Anyone who can read the data directory can read the
    /// verifier and brute-force it offline.
    Base64Fallback,
}

impl StorageProtection {
    pub fn is_weak(&self) -> bool {
        matches!(self, Self::Base64Fallback)
    }
}

impl std::fmt::Display for StorageProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlatformKeyring => write!(f, "platform_keyring"),
            Self::Base64Fallback => write!(f, "base64_fallback"),
        }
    }
}
