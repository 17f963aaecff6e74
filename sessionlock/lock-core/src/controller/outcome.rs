use serde::Serialize;

/// Result of an unlock attempt. Rejections are values, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UnlockOutcome {
    Unlocked,
    /// Wrong PIN, or an attempt inside the delay window (not counted).
    Delay {
        retry_after_secs: u64,
        remaining_attempts: u32,
    },
    LockedOut { remaining_secs: u64 },
    /// Paranoia mode destroyed the protected data.
    Wiped,
}

impl UnlockOutcome {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked)
    }
}
