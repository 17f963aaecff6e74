//! The lock state machine and the host-facing API.
//!
//! [`LockController`] owns every other component. All PIN verification and
//! attempt-state mutation happens inside one async critical section, so two
//! concurrent attempts can never both read the same failure count.

mod config;
mod events;
mod outcome;
mod reset;

pub use config::{LockConfig, DEFAULT_RESET_TOKEN_TTL};
pub use events::{LockEvent, WipeTrigger};
pub use outcome::UnlockOutcome;
pub use reset::ResetToken;

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sessionlock_secretstore::SecretBackend;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::autolock::{AutoLockPolicy, AutoLockScheduler, LockReason, LockRequest};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SessionLockError};
use crate::security::{
    AttemptState, FailureOutcome, IntegrityReport, LockoutConfig, LockoutPolicy, LockoutStatus,
    SecureEraser, SessionIntegrityGuard, WipeReport,
};
use crate::storage::{keys, SecuritySettings, SecuritySettingsPatch, StateBatch, StateStore};
use crate::vault::{validate_pin, CredentialVault, LockState, SealedPinData, StorageProtection};
use reset::ResetTokens;

/// Result of one counted (or refused) PIN attempt, before it is mapped onto
/// an unlock outcome or an error.
enum Attempt {
    Verified,
    /// Wrong PIN; counted.
    Rejected { retry_after: Duration },
    /// Refused inside the delay window; not counted.
    Throttled { retry_after: Duration },
    LockedOut { remaining: Duration },
    Wiped,
}

struct Inner {
    state: LockState,
    settings: SecuritySettings,
    policy: LockoutPolicy,
    pin_configured: bool,
}

impl Inner {
    fn protection_active(&self) -> bool {
        self.settings.pin_enabled && self.pin_configured
    }
}

/// PIN gate over the host's protected session data.
pub struct LockController {
    config: LockConfig,
    store: Arc<StateStore>,
    vault: Arc<CredentialVault>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    scheduler: AutoLockScheduler,
    eraser: SecureEraser,
    integrity: Arc<SessionIntegrityGuard>,
    events: broadcast::Sender<LockEvent>,
    reset_tokens: StdMutex<ResetTokens>,
    shutdown: CancellationToken,
}

impl LockController {
    /// Load persisted state and start listening for auto-lock requests.
    pub async fn open(config: LockConfig, secrets: Arc<dyn SecretBackend>) -> Result<Arc<Self>> {
        Self::open_with_clock(config, secrets, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: LockConfig,
        secrets: Arc<dyn SecretBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(StateStore::open(&config.data_dir)?);
        let settings = SecuritySettings::load(&store)?;
        let attempts = AttemptState::load(&store)?;

        let vault = Arc::new(CredentialVault::new(
            store.clone(),
            secrets,
            config.allow_weak_pin_storage,
            config.pin_kdf_iterations,
        ));
        let pin_configured = vault.has_pin()?;

        let mut policy = LockoutPolicy::new(LockoutConfig::from(&settings), attempts);
        let now = clock.now();
        if policy.refresh(now) {
            persist_attempts(&store, &policy);
        }

        let state = if !settings.pin_enabled {
            LockState::Unlocked
        } else if !pin_configured {
            LockState::AwaitingSetup
        } else {
            match policy.lockout_deadline() {
                Some(until) if until > now => LockState::LockedOut { until },
                _ => LockState::Locked,
            }
        };
        info!("Session lock opened in state {}", state);

        let (scheduler, requests) = AutoLockScheduler::new();
        scheduler.configure(AutoLockPolicy::from_settings(&settings, pin_configured));

        // Same capacity the rest of the event plumbing uses.
        let (events, _) = broadcast::channel(16);
        let integrity = Arc::new(SessionIntegrityGuard::new(store.clone(), clock.clone()));

        let controller = Arc::new(Self {
            config,
            store,
            vault,
            clock,
            inner: Mutex::new(Inner {
                state,
                settings,
                policy,
                pin_configured,
            }),
            scheduler,
            eraser: SecureEraser::new(),
            integrity,
            events,
            reset_tokens: StdMutex::new(ResetTokens::default()),
            shutdown: CancellationToken::new(),
        });

        spawn_request_listener(Arc::downgrade(&controller), requests, controller.shutdown.clone());
        Ok(controller)
    }

    /// Receive lock events. Each subscriber sees every event sent after it
    /// subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> LockState {
        self.inner.lock().await.state
    }

    /// Whether protected content may be shown right now.
    pub async fn is_content_accessible(&self) -> bool {
        self.state().await.is_unlocked()
    }

    pub async fn is_pin_configured(&self) -> bool {
        self.inner.lock().await.pin_configured
    }

    pub async fn is_pin_enabled(&self) -> bool {
        self.inner.lock().await.settings.pin_enabled
    }

    pub fn storage_protection(&self) -> Result<Option<StorageProtection>> {
        Ok(self.vault.storage_protection()?)
    }

    /// Create the first PIN. Enables protection and leaves the session
    /// unlocked.
    pub async fn setup_pin(&self, pin: &str) -> Result<StorageProtection> {
        validate_pin(pin)?;
        let mut inner = self.inner.lock().await;
        if inner.state == LockState::Wiping {
            return Err(SessionLockError::Wiping);
        }
        if inner.pin_configured && inner.settings.pin_enabled {
            return Err(SessionLockError::AlreadyConfigured);
        }
        if inner.pin_configured {
            // Leftover record from an interrupted removal.
            warn!("Replacing stale PIN record while protection was disabled");
        }

        let sealed = self.seal_pin(pin).await?;
        let mut settings = inner.settings.clone();
        settings.pin_enabled = true;
        // Record, flag and attempt reset land in one file replacement.
        let batch = settings
            .to_batch()?
            .set(keys::PIN_DATA, &sealed)?
            .merge(AttemptState::default().to_batch()?);
        self.store.write_batch(batch)?;

        let protection = sealed.protection;
        inner.settings = settings;
        inner.pin_configured = true;
        inner.policy.record_success();

        self.set_state(&mut inner, LockState::Unlocked);
        self.reconfigure_scheduler(&inner);
        self.emit(LockEvent::PinChanged);
        info!("PIN protection set up ({})", protection);
        Ok(protection)
    }

    /// Replace the PIN after verifying the current one.
    ///
    /// A wrong current PIN counts as a failed attempt.
    pub async fn change_pin(&self, current: &str, new_pin: &str) -> Result<StorageProtection> {
        validate_pin(new_pin)?;
        let mut inner = self.inner.lock().await;
        self.authenticate(&mut inner, current).await?;

        let sealed = self.seal_pin(new_pin).await?;
        let batch = StateBatch::new()
            .set(keys::PIN_DATA, &sealed)?
            .merge(AttemptState::default().to_batch()?);
        self.store.write_batch(batch)?;

        let protection = sealed.protection;
        inner.policy.record_success();
        self.emit(LockEvent::PinChanged);
        info!("PIN changed ({})", protection);
        Ok(protection)
    }

    /// Disable protection after verifying the current PIN.
    ///
    /// A wrong current PIN counts as a failed attempt.
    pub async fn remove_pin(&self, current: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.authenticate(&mut inner, current).await?;

        self.disable_protection(&mut inner)?;
        self.set_state(&mut inner, LockState::Unlocked);
        self.reconfigure_scheduler(&inner);
        info!("PIN protection removed");
        Ok(())
    }

    /// Try to unlock with `pin`.
    ///
    /// Wrong PINs are reported as [`UnlockOutcome::Delay`], not as errors.
    /// A malformed PIN is a validation error and is not counted.
    ///
    /// While protection is active every well-formed PIN is verified and
    /// counted, even if the session is already unlocked. Without protection
    /// the call is a no-op returning `Unlocked`.
    pub async fn unlock(&self, pin: &str) -> Result<UnlockOutcome> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            LockState::Wiping => return Err(SessionLockError::Wiping),
            LockState::AwaitingSetup => return Err(SessionLockError::NotConfigured),
            LockState::Unlocked if !inner.protection_active() => {
                return Ok(UnlockOutcome::Unlocked)
            }
            LockState::Unlocked | LockState::Locked | LockState::LockedOut { .. } => {}
        }
        validate_pin(pin)?;

        let outcome = match self.attempt(&mut inner, pin).await? {
            Attempt::Verified => {
                if inner.state != LockState::Unlocked {
                    self.set_state(&mut inner, LockState::Unlocked);
                    self.emit(LockEvent::Unlocked);
                }
                self.scheduler.start_default();
                UnlockOutcome::Unlocked
            }
            Attempt::Rejected { retry_after } | Attempt::Throttled { retry_after } => {
                UnlockOutcome::Delay {
                    retry_after_secs: ceil_secs(retry_after),
                    remaining_attempts: inner.policy.remaining_attempts(),
                }
            }
            Attempt::LockedOut { remaining } => UnlockOutcome::LockedOut {
                remaining_secs: ceil_secs(remaining),
            },
            Attempt::Wiped => UnlockOutcome::Wiped,
        };
        Ok(outcome)
    }

    /// Current lockout, clearing it first if it has elapsed.
    pub async fn check_lockout_status(&self) -> LockoutStatus {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        self.sync_lockout(&mut inner, now);
        inner.policy.check_lockout(now)
    }

    /// Lock immediately. Does nothing unless protection is active and the
    /// session is unlocked.
    pub async fn lock_now(&self) -> LockState {
        self.apply_lock(LockReason::Manual).await
    }

    pub async fn get_settings(&self) -> SecuritySettings {
        self.inner.lock().await.settings.clone()
    }

    /// Apply a partial settings update and persist it.
    ///
    /// `pin_enabled` can only be switched on here; turning protection off
    /// goes through [`remove_pin`](Self::remove_pin). Nothing can be changed
    /// while the session is locked.
    pub async fn save_settings(&self, patch: SecuritySettingsPatch) -> Result<SecuritySettings> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        self.sync_lockout(&mut inner, now);
        match inner.state {
            LockState::Wiping => return Err(SessionLockError::Wiping),
            LockState::Locked => return Err(SessionLockError::Locked),
            LockState::LockedOut { until } => {
                let remaining = (until - now).to_std().unwrap_or_default();
                return Err(SessionLockError::LockedOut {
                    remaining_secs: ceil_secs(remaining),
                });
            }
            LockState::Unlocked | LockState::AwaitingSetup => {}
        }
        if patch.pin_enabled == Some(false) && inner.settings.pin_enabled {
            return Err(SessionLockError::Validation(
                "Disabling the PIN requires the current PIN".into(),
            ));
        }

        let updated = inner.settings.apply(&patch)?;
        updated.save(&self.store)?;
        inner.policy.set_config(LockoutConfig::from(&updated));
        inner.settings = updated;

        if inner.settings.pin_enabled && !inner.pin_configured {
            self.set_state(&mut inner, LockState::AwaitingSetup);
        }
        self.reconfigure_scheduler(&inner);
        debug!("Security settings saved");
        Ok(inner.settings.clone())
    }

    /// Issue a confirmation token for [`request_destructive_reset`](Self::request_destructive_reset).
    ///
    /// The host must only call this after the user has explicitly confirmed.
    pub fn issue_reset_token(&self) -> ResetToken {
        let mut tokens = self.reset_tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.issue(self.clock.now(), self.config.reset_token_ttl)
    }

    /// Destroy all protected data and disable PIN protection.
    ///
    /// Works from any state, including `LockedOut`, which makes it the
    /// recovery path for a forgotten PIN.
    pub async fn request_destructive_reset(&self, token: &str) -> Result<WipeReport> {
        let confirmed = {
            let mut tokens = self.reset_tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.redeem(token, self.clock.now())
        };
        if !confirmed {
            warn!("Destructive reset refused: invalid or expired confirmation");
            return Err(SessionLockError::ResetNotConfirmed);
        }

        let mut inner = self.inner.lock().await;
        self.wipe(&mut inner, WipeTrigger::UserReset).await
    }

    /// Forward user activity to the inactivity timer.
    pub fn notify_activity(&self) {
        self.scheduler.notify_activity();
    }

    pub fn on_system_suspend(&self) {
        self.scheduler.on_system_suspend();
    }

    pub fn on_screen_lock(&self) {
        self.scheduler.on_screen_lock();
    }

    /// Compare protected partitions against the snapshot taken at the last
    /// clean shutdown. Call once at startup.
    pub async fn verify_session_integrity(&self) -> Result<IntegrityReport> {
        let integrity = self.integrity.clone();
        let partitions = self.config.partitions.clone();
        let report = run_blocking(move || integrity.verify_stored(&partitions)).await?;

        let mismatched = report.mismatched();
        if !mismatched.is_empty() {
            self.emit(LockEvent::IntegrityMismatch {
                partitions: mismatched,
            });
        }
        Ok(report)
    }

    /// Stop background work and record an integrity snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.scheduler.cancel();

        let inner = self.inner.lock().await;
        if inner.state == LockState::Wiping {
            debug!("Skipping integrity snapshot after wipe");
            return Ok(());
        }

        let integrity = self.integrity.clone();
        let partitions = self.config.partitions.clone();
        run_blocking(move || integrity.record_snapshot(&partitions)).await?;
        info!("Session lock shut down");
        Ok(())
    }

    async fn apply_lock(&self, reason: LockReason) -> LockState {
        let mut inner = self.inner.lock().await;
        if inner.state == LockState::Unlocked && inner.protection_active() {
            self.scheduler.cancel();
            self.set_state(&mut inner, LockState::Locked);
            self.emit(LockEvent::Locked { reason });
        } else {
            debug!("Lock request ({}) ignored in state {}", reason, inner.state);
        }
        inner.state
    }

    /// Verify `pin` for a PIN-management operation, mapping every rejection
    /// onto an error.
    async fn authenticate(&self, inner: &mut Inner, pin: &str) -> Result<()> {
        match inner.state {
            LockState::Wiping => return Err(SessionLockError::Wiping),
            LockState::AwaitingSetup => return Err(SessionLockError::NotConfigured),
            _ => {}
        }
        if !inner.pin_configured {
            return Err(SessionLockError::NotConfigured);
        }
        validate_pin(pin)?;

        match self.attempt(inner, pin).await? {
            Attempt::Verified => Ok(()),
            Attempt::Rejected { retry_after } => Err(SessionLockError::InvalidPin {
                remaining_attempts: inner.policy.remaining_attempts(),
                retry_after_secs: ceil_secs(retry_after),
            }),
            Attempt::Throttled { retry_after } => Err(SessionLockError::RetryLater {
                retry_after_secs: ceil_secs(retry_after),
            }),
            Attempt::LockedOut { remaining } => Err(SessionLockError::LockedOut {
                remaining_secs: ceil_secs(remaining),
            }),
            Attempt::Wiped => Err(SessionLockError::Wiped),
        }
    }

    /// The read-decide-write core shared by every PIN check. The caller holds
    /// the critical section for the whole call.
    async fn attempt(&self, inner: &mut Inner, pin: &str) -> Result<Attempt> {
        let now = self.clock.now();
        self.sync_lockout(inner, now);

        let status = inner.policy.check_lockout(now);
        if status.locked {
            debug!("PIN attempt refused, locked out for {:?}", status.remaining);
            return Ok(Attempt::LockedOut {
                remaining: status.remaining,
            });
        }
        let retry_after = inner.policy.retry_after(now);
        if !retry_after.is_zero() {
            debug!("PIN attempt refused, retry in {:?}", retry_after);
            return Ok(Attempt::Throttled { retry_after });
        }

        let vault = self.vault.clone();
        let pin = Zeroizing::new(pin.to_string());
        let matches = run_blocking(move || Ok(vault.verify_pin(&pin)?)).await?;

        if matches {
            inner.policy.record_success();
            persist_attempts(&self.store, &inner.policy);
            info!("PIN verified");
            return Ok(Attempt::Verified);
        }

        let outcome = inner.policy.record_failure(now);
        persist_attempts(&self.store, &inner.policy);
        match outcome {
            FailureOutcome::Delay(retry_after) => Ok(Attempt::Rejected { retry_after }),
            FailureOutcome::LockedOut(remaining) => {
                if let Some(until) = inner.policy.lockout_deadline() {
                    self.scheduler.cancel();
                    self.set_state(inner, LockState::LockedOut { until });
                    self.emit(LockEvent::LockedOut { until });
                }
                Ok(Attempt::LockedOut { remaining })
            }
            FailureOutcome::TriggerWipe => {
                self.wipe(inner, WipeTrigger::MaxAttempts).await?;
                Ok(Attempt::Wiped)
            }
        }
    }

    /// Reconcile `state` with the policy's view of the lockout at `now`.
    fn sync_lockout(&self, inner: &mut Inner, now: DateTime<Utc>) {
        if inner.policy.refresh(now) {
            persist_attempts(&self.store, &inner.policy);
        }
        let locked_until = match inner.policy.lockout_deadline() {
            Some(until) if until > now => Some(until),
            _ => None,
        };

        match (inner.state, locked_until) {
            (LockState::LockedOut { .. }, None) => self.set_state(inner, LockState::Locked),
            (LockState::Locked, Some(until)) => {
                self.set_state(inner, LockState::LockedOut { until });
            }
            _ => {}
        }
    }

    /// Erase every partition, then drop the PIN. On failure the PIN record is
    /// kept and the session stays locked.
    async fn wipe(&self, inner: &mut Inner, trigger: WipeTrigger) -> Result<WipeReport> {
        warn!("Wiping protected session data ({:?})", trigger);
        let previous = inner.state;
        self.scheduler.cancel();
        self.set_state(inner, LockState::Wiping);
        self.emit(LockEvent::WipeStarted { trigger });

        let eraser = self.eraser.clone();
        let integrity = self.integrity.clone();
        let partitions = self.config.partitions.clone();
        let erased = tokio::task::spawn_blocking(move || eraser.wipe_all(&partitions, &integrity))
            .await
            .map_err(|e| SessionLockError::Storage(format!("Erase task failed: {}", e)))?;

        let report = match erased {
            Ok(report) => report,
            Err(e) => {
                error!("Wipe failed, keeping PIN protection: {}", e);
                let now = self.clock.now();
                let fallback = match previous {
                    LockState::Unlocked if inner.protection_active() => LockState::Locked,
                    LockState::Unlocked | LockState::AwaitingSetup => previous,
                    _ => match inner.policy.lockout_deadline() {
                        Some(until) if until > now => LockState::LockedOut { until },
                        _ => LockState::Locked,
                    },
                };
                self.set_state(inner, fallback);
                return Err(e.into());
            }
        };

        if report.fallback_count() > 0 {
            warn!(
                "{} files could only be unlinked, not overwritten",
                report.fallback_count()
            );
        }

        if let Err(e) = self.disable_protection(inner) {
            // Data is gone; a stale record only costs a setup prompt later.
            error!("Failed to clear PIN state after wipe: {}", e);
        }
        self.emit(LockEvent::Wiped {
            report: report.clone(),
        });
        self.emit(LockEvent::RelaunchRequested);
        info!("Wipe complete, relaunch requested");
        Ok(report)
    }

    /// Remove the PIN record, persist `pin_enabled = false` and reset
    /// attempts in one write. Memory is only updated once that write lands.
    fn disable_protection(&self, inner: &mut Inner) -> Result<()> {
        let protection = self.vault.storage_protection()?;
        let mut settings = inner.settings.clone();
        settings.pin_enabled = false;
        let batch = settings
            .to_batch()?
            .remove(keys::PIN_DATA)
            .merge(AttemptState::default().to_batch()?);
        self.store.write_batch(batch)?;

        if protection == Some(StorageProtection::PlatformKeyring) {
            self.vault.release_wrapping_key();
        }
        inner.settings = settings;
        inner.pin_configured = false;
        inner.policy.record_success();
        info!("PIN record removed");
        self.scheduler.configure(AutoLockPolicy::inactive());
        self.emit(LockEvent::ProtectionDisabled);
        Ok(())
    }

    async fn seal_pin(&self, pin: &str) -> Result<SealedPinData> {
        let vault = self.vault.clone();
        let pin = Zeroizing::new(pin.to_string());
        run_blocking(move || Ok(vault.seal_pin(&pin)?)).await
    }

    fn reconfigure_scheduler(&self, inner: &Inner) {
        self.scheduler
            .configure(AutoLockPolicy::from_settings(&inner.settings, inner.pin_configured));
        if inner.state == LockState::Unlocked && !self.scheduler.is_armed() {
            self.scheduler.start_default();
        }
    }

    fn set_state(&self, inner: &mut Inner, next: LockState) {
        if inner.state != next {
            info!("Lock state: {} -> {}", inner.state, next);
            inner.state = next;
        }
    }

    fn emit(&self, event: LockEvent) {
        debug!("Lock event: {:?}", event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for LockController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_request_listener(
    controller: Weak<LockController>,
    mut requests: mpsc::Receiver<LockRequest>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let Some(controller) = controller.upgrade() else { break };
                    controller.apply_lock(request.reason).await;
                }
            }
        }
        debug!("Lock request listener stopped");
    });
}

/// Persist attempt state. A write failure is logged; the in-memory count is
/// still enforced for this session.
fn persist_attempts(store: &StateStore, policy: &LockoutPolicy) {
    let result = policy
        .state()
        .to_batch()
        .and_then(|batch| store.write_batch(batch));
    if let Err(e) = result {
        warn!("Failed to persist attempt state: {}", e);
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionLockError::Storage(format!("Blocking task failed: {}", e)))?
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
