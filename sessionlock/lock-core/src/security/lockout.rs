//! Brute-force escalation for PIN attempts.
//!
//! Failures map onto a non-decreasing delay table. The final tier is not in
//! the table: reaching `max_attempts` either locks out for the configured
//! `lockout_duration` or, in paranoia mode, requests a wipe instead.
//!
//! | failures          | delay                |
//! |-------------------|----------------------|
//! | 1-3               | none                 |
//! | 4-5               | 5 s                  |
//! | 6-7               | 30 s                 |
//! | 8-9               | 5 min                |
//! | >= max_attempts   | lockout (or wipe)    |

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{keys, SecuritySettings, StateBatch, StateStore};

/// One row of the delay table: from `min_failures` onwards, wait `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayTier {
    pub min_failures: u32,
    pub delay: Duration,
}

/// Delay tiers below the lockout threshold, ordered by `min_failures`.
pub const DEFAULT_DELAY_TIERS: [DelayTier; 4] = [
    DelayTier {
        min_failures: 1,
        delay: Duration::ZERO,
    },
    DelayTier {
        min_failures: 4,
        delay: Duration::from_secs(5),
    },
    DelayTier {
        min_failures: 6,
        delay: Duration::from_secs(30),
    },
    DelayTier {
        min_failures: 8,
        delay: Duration::from_secs(5 * 60),
    },
];

/// Persisted failure bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptState {
    /// Never exceeds the configured `max_attempts`.
    pub failed_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub lockout_until: Option<DateTime<Utc>>,
}

impl AttemptState {
    pub fn load(store: &StateStore) -> Result<Self> {
        Ok(Self {
            failed_count: store.get(keys::FAILED_ATTEMPTS)?.unwrap_or(0),
            last_failure: store.get(keys::LAST_FAILED_ATTEMPT)?,
            lockout_until: store.get(keys::LOCKOUT_UNTIL)?,
        })
    }

    pub fn to_batch(&self) -> Result<StateBatch> {
        let batch = StateBatch::new().set(keys::FAILED_ATTEMPTS, &self.failed_count)?;
        let batch = match &self.last_failure {
            Some(at) => batch.set(keys::LAST_FAILED_ATTEMPT, at)?,
            None => batch.remove(keys::LAST_FAILED_ATTEMPT),
        };
        Ok(match &self.lockout_until {
            Some(until) => batch.set(keys::LOCKOUT_UNTIL, until)?,
            None => batch.remove(keys::LOCKOUT_UNTIL),
        })
    }
}

/// The parameters of the final tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
    pub delete_on_max_attempts: bool,
}

impl From<&SecuritySettings> for LockoutConfig {
    fn from(settings: &SecuritySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            lockout_duration: settings.lockout_duration(),
            delete_on_max_attempts: settings.delete_on_max_attempts,
        }
    }
}

/// What a failed attempt costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Further attempts are refused for this long (may be zero).
    Delay(Duration),
    /// `max_attempts` reached; attempts are refused for this long.
    LockedOut(Duration),
    /// `max_attempts` reached in paranoia mode; destroy the protected data.
    TriggerWipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutStatus {
    pub locked: bool,
    #[serde(rename = "remainingSecs", serialize_with = "serialize_secs")]
    pub remaining: Duration,
}

impl LockoutStatus {
    pub fn unlocked() -> Self {
        Self {
            locked: false,
            remaining: Duration::ZERO,
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Decides delay, lockout and wipe for a stream of verification outcomes.
///
/// Pure bookkeeping over an explicit `now`; the caller serializes access and
/// persists [`AttemptState`] after every mutation.
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    state: AttemptState,
    config: LockoutConfig,
}

impl LockoutPolicy {
    pub fn new(config: LockoutConfig, state: AttemptState) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LockoutConfig) {
        self.config = config;
    }

    pub fn failed_count(&self) -> u32 {
        self.state.failed_count
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.config.max_attempts.saturating_sub(self.state.failed_count)
    }

    /// The table delay for a cumulative failure count below the threshold.
    pub fn delay_for(failures: u32) -> Duration {
        DEFAULT_DELAY_TIERS
            .iter()
            .rev()
            .find(|tier| failures >= tier.min_failures)
            .map(|tier| tier.delay)
            .unwrap_or(Duration::ZERO)
    }

    /// Count one failed attempt at `now`.
    ///
    /// At the threshold, paranoia mode yields `TriggerWipe` and schedules no
    /// lockout; otherwise a lockout of `lockout_duration` starts.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> FailureOutcome {
        let max = self.config.max_attempts;
        self.state.failed_count = self.state.failed_count.saturating_add(1).min(max);
        self.state.last_failure = Some(now);

        let failures = self.state.failed_count;
        if failures >= max {
            if self.config.delete_on_max_attempts {
                warn!("Failed attempt {} reached the limit, wipe requested", failures);
                self.state.lockout_until = None;
                return FailureOutcome::TriggerWipe;
            }

            let duration = self.config.lockout_duration;
            self.state.lockout_until = Some(add_std(now, duration));
            warn!("Failed attempt {} reached the limit, locked out for {:?}", failures, duration);
            return FailureOutcome::LockedOut(duration);
        }

        let delay = Self::delay_for(failures);
        debug!("Failed attempt {}/{}, delay {:?}", failures, max, delay);
        FailureOutcome::Delay(delay)
    }

    /// Reset after a successful verification or a PIN (re)configuration.
    pub fn record_success(&mut self) {
        if self.state != AttemptState::default() {
            debug!("Resetting attempt state after {} failures", self.state.failed_count);
        }
        self.state = AttemptState::default();
    }

    /// Whether attempts are refused because of a lockout. Pure read.
    pub fn check_lockout(&self, now: DateTime<Utc>) -> LockoutStatus {
        match self.lockout_deadline() {
            Some(until) if until > now => LockoutStatus {
                locked: true,
                remaining: (until - now).to_std().unwrap_or(Duration::ZERO),
            },
            _ => LockoutStatus::unlocked(),
        }
    }

    /// When the current lockout ends, if the threshold has been reached.
    pub fn lockout_deadline(&self) -> Option<DateTime<Utc>> {
        if let Some(until) = self.state.lockout_until {
            return Some(until);
        }
        // A threshold count without a recorded deadline (e.g. after a wipe
        // that failed) still locks out, measured from the last failure.
        if self.state.failed_count >= self.config.max_attempts {
            return self
                .state
                .last_failure
                .map(|at| add_std(at, self.config.lockout_duration));
        }
        None
    }

    /// Time left before the next attempt is accepted under the delay table.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.state.last_failure else {
            return Duration::ZERO;
        };
        let ready_at = add_std(last, Self::delay_for(self.state.failed_count));
        (ready_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Lazily clear an elapsed lockout. Returns true when state was reset.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        match self.lockout_deadline() {
            Some(until) if until <= now => {
                info!("Lockout elapsed, resetting attempt counter");
                self.state = AttemptState::default();
                true
            }
            _ => false,
        }
    }
}

fn add_std(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
