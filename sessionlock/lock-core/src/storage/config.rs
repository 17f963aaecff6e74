use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::keys;
use super::store::{StateBatch, StateStore};
use crate::error::{Result, SessionLockError};

pub const MIN_AUTO_LOCK_TIMEOUT_MINUTES: u32 = 1;
pub const MAX_AUTO_LOCK_TIMEOUT_MINUTES: u32 = 30;
pub const MIN_MAX_ATTEMPTS: u32 = 3;
pub const MAX_MAX_ATTEMPTS: u32 = 100;
pub const MIN_LOCKOUT_DURATION_MINUTES: u32 = 1;
pub const MAX_LOCKOUT_DURATION_MINUTES: u32 = 24 * 60;

/// User-facing security configuration.
///
/// Persisted as individual plaintext `security.*` keys. None of these values
/// are secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    pub pin_enabled: bool,
    pub auto_lock_enabled: bool,
    pub auto_lock_timeout_minutes: u32,
    pub lock_on_suspend: bool,
    pub lock_on_screen_lock: bool,
    pub max_attempts: u32,
    pub lockout_duration_minutes: u32,
    /// Paranoia mode: wipe protected data instead of locking out.
    pub delete_on_max_attempts: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            pin_enabled: false,
            auto_lock_enabled: true,
            auto_lock_timeout_minutes: 5,
            lock_on_suspend: true,
            lock_on_screen_lock: true,
            max_attempts: 10,
            lockout_duration_minutes: 30,
            delete_on_max_attempts: false,
        }
    }
}

/// A partial settings update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettingsPatch {
    pub pin_enabled: Option<bool>,
    pub auto_lock_enabled: Option<bool>,
    pub auto_lock_timeout_minutes: Option<u32>,
    pub lock_on_suspend: Option<bool>,
    pub lock_on_screen_lock: Option<bool>,
    pub max_attempts: Option<u32>,
    pub lockout_duration_minutes: Option<u32>,
    pub delete_on_max_attempts: Option<bool>,
}

impl SecuritySettings {
    /// Load settings, falling back to defaults for missing keys.
    ///
    /// Out-of-range values (e.g. from a hand-edited file) are pulled back
    /// into their documented ranges.
    pub fn load(store: &StateStore) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            pin_enabled: store.get(keys::PIN_ENABLED)?.unwrap_or(defaults.pin_enabled),
            auto_lock_enabled: store
                .get(keys::AUTO_LOCK_ENABLED)?
                .unwrap_or(defaults.auto_lock_enabled),
            auto_lock_timeout_minutes: store
                .get(keys::AUTO_LOCK_TIMEOUT)?
                .unwrap_or(defaults.auto_lock_timeout_minutes),
            lock_on_suspend: store
                .get(keys::AUTO_LOCK_ON_SUSPEND)?
                .unwrap_or(defaults.lock_on_suspend),
            lock_on_screen_lock: store
                .get(keys::AUTO_LOCK_ON_SCREEN_LOCK)?
                .unwrap_or(defaults.lock_on_screen_lock),
            max_attempts: store.get(keys::MAX_ATTEMPTS)?.unwrap_or(defaults.max_attempts),
            lockout_duration_minutes: store
                .get(keys::LOCKOUT_DURATION)?
                .unwrap_or(defaults.lockout_duration_minutes),
            delete_on_max_attempts: store
                .get(keys::DELETE_ON_MAX_ATTEMPTS)?
                .unwrap_or(defaults.delete_on_max_attempts),
        };
        Ok(settings.sanitized())
    }

    /// Build the batch that persists every field.
    pub fn to_batch(&self) -> Result<StateBatch> {
        StateBatch::new()
            .set(keys::PIN_ENABLED, &self.pin_enabled)?
            .set(keys::AUTO_LOCK_ENABLED, &self.auto_lock_enabled)?
            .set(keys::AUTO_LOCK_TIMEOUT, &self.auto_lock_timeout_minutes)?
            .set(keys::AUTO_LOCK_ON_SUSPEND, &self.lock_on_suspend)?
            .set(keys::AUTO_LOCK_ON_SCREEN_LOCK, &self.lock_on_screen_lock)?
            .set(keys::MAX_ATTEMPTS, &self.max_attempts)?
            .set(keys::LOCKOUT_DURATION, &self.lockout_duration_minutes)?
            .set(keys::DELETE_ON_MAX_ATTEMPTS, &self.delete_on_max_attempts)
    }

    pub fn save(&self, store: &StateStore) -> Result<()> {
        store.write_batch(self.to_batch()?)
    }

    /// Apply `patch` on top of these settings.
    ///
    /// The auto-lock timeout is clamped into [1, 30] minutes; attempt and
    /// lockout limits outside their ranges are rejected.
    pub fn apply(&self, patch: &SecuritySettingsPatch) -> Result<Self> {
        if let Some(max) = patch.max_attempts {
            if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&max) {
                return Err(SessionLockError::Validation(format!(
                    "maxAttempts must be between {} and {}",
                    MIN_MAX_ATTEMPTS, MAX_MAX_ATTEMPTS
                )));
            }
        }
        if let Some(minutes) = patch.lockout_duration_minutes {
            if !(MIN_LOCKOUT_DURATION_MINUTES..=MAX_LOCKOUT_DURATION_MINUTES).contains(&minutes) {
                return Err(SessionLockError::Validation(format!(
                    "lockoutDuration must be between {} and {} minutes",
                    MIN_LOCKOUT_DURATION_MINUTES, MAX_LOCKOUT_DURATION_MINUTES
                )));
            }
        }

        let next = Self {
            pin_enabled: patch.pin_enabled.unwrap_or(self.pin_enabled),
            auto_lock_enabled: patch.auto_lock_enabled.unwrap_or(self.auto_lock_enabled),
            auto_lock_timeout_minutes: patch
                .auto_lock_timeout_minutes
                .unwrap_or(self.auto_lock_timeout_minutes),
            lock_on_suspend: patch.lock_on_suspend.unwrap_or(self.lock_on_suspend),
            lock_on_screen_lock: patch.lock_on_screen_lock.unwrap_or(self.lock_on_screen_lock),
            max_attempts: patch.max_attempts.unwrap_or(self.max_attempts),
            lockout_duration_minutes: patch
                .lockout_duration_minutes
                .unwrap_or(self.lockout_duration_minutes),
            delete_on_max_attempts: patch
                .delete_on_max_attempts
                .unwrap_or(self.delete_on_max_attempts),
        };
        Ok(next.sanitized())
    }

    pub fn auto_lock_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.auto_lock_timeout_minutes) * 60)
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.lockout_duration_minutes) * 60)
    }

    fn sanitized(mut self) -> Self {
        self.auto_lock_timeout_minutes = self
            .auto_lock_timeout_minutes
            .clamp(MIN_AUTO_LOCK_TIMEOUT_MINUTES, MAX_AUTO_LOCK_TIMEOUT_MINUTES);
        self.max_attempts = self.max_attempts.clamp(MIN_MAX_ATTEMPTS, MAX_MAX_ATTEMPTS);
        self.lockout_duration_minutes = self
            .lockout_duration_minutes
            .clamp(MIN_LOCKOUT_DURATION_MINUTES, MAX_LOCKOUT_DURATION_MINUTES);
        self
    }
}
