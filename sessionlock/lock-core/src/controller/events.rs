use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::autolock::LockReason;
use crate::security::WipeReport;

/// What started a wipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WipeTrigger {
    /// Paranoia mode and `max_attempts` failures.
    MaxAttempts,
    /// Confirmed destructive reset.
    UserReset,
}

/// Notifications for host observers (UI, tray, window manager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LockEvent {
    Locked { reason: LockReason },
    Unlocked,
    LockedOut { until: DateTime<Utc> },
    WipeStarted { trigger: WipeTrigger },
    Wiped { report: WipeReport },
    /// Protected data is gone; the host should restart with fresh sessions.
    RelaunchRequested,
    /// Advisory only.
    IntegrityMismatch { partitions: Vec<String> },
    ProtectionDisabled,
    PinChanged,
}
