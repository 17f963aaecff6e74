use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::SecuritySettings;

/// Why a lock was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockReason {
    Inactivity,
    Suspend,
    ScreenLock,
    Manual,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockReason::Inactivity => "inactivity",
            LockReason::Suspend => "system suspend",
            LockReason::ScreenLock => "screen lock",
            LockReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub reason: LockReason,
}

/// What the scheduler is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoLockPolicy {
    /// A PIN is configured and enabled. Nothing fires otherwise.
    pub active: bool,
    pub timer_enabled: bool,
    pub timeout: Duration,
    pub on_suspend: bool,
    pub on_screen_lock: bool,
}

impl AutoLockPolicy {
    pub fn inactive() -> Self {
        Self {
            active: false,
            timer_enabled: false,
            timeout: Duration::from_secs(5 * 60),
            on_suspend: false,
            on_screen_lock: false,
        }
    }

    pub fn from_settings(settings: &SecuritySettings, pin_configured: bool) -> Self {
        Self {
            active: settings.pin_enabled && pin_configured,
            timer_enabled: settings.auto_lock_enabled,
            timeout: settings.auto_lock_timeout(),
            on_suspend: settings.lock_on_suspend,
            on_screen_lock: settings.lock_on_screen_lock,
        }
    }
}

struct TimerState {
    policy: AutoLockPolicy,
    /// Bumped on every arm/cancel; a firing timer only counts if it still
    /// holds the current generation.
    generation: u64,
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

/// A single cancellable inactivity timer plus edge-triggered system signals.
///
/// The scheduler only emits [`LockRequest`]s; it knows nothing about PINs.
pub struct AutoLockScheduler {
    state: Arc<Mutex<TimerState>>,
    tx: mpsc::Sender<LockRequest>,
}

impl AutoLockScheduler {
    pub fn new() -> (Self, mpsc::Receiver<LockRequest>) {
        // A pending request already means "lock"; a small buffer is plenty.
        let (tx, rx) = mpsc::channel(16);
        let scheduler = Self {
            state: Arc::new(Mutex::new(TimerState {
                policy: AutoLockPolicy::inactive(),
                generation: 0,
                token: None,
                deadline: None,
            })),
            tx,
        };
        (scheduler, rx)
    }

    /// Replace the policy. A running timer is rearmed with the new timeout,
    /// or cancelled if the timer is no longer allowed.
    pub fn configure(&self, policy: AutoLockPolicy) {
        let mut state = self.lock();
        let was_armed = state.token.is_some();
        state.policy = policy;

        if !policy.active || !policy.timer_enabled {
            Self::disarm(&mut state);
        } else if was_armed {
            self.arm(&mut state);
        }
        debug!("Auto-lock policy updated: {:?}", policy);
    }

    /// Arm the inactivity timer with `timeout`.
    pub fn start(&self, timeout: Duration) {
        let mut state = self.lock();
        state.policy.timeout = timeout;
        if state.policy.active && state.policy.timer_enabled {
            self.arm(&mut state);
        }
    }

    /// Arm the inactivity timer with the configured timeout.
    pub fn start_default(&self) {
        let timeout = self.lock().policy.timeout;
        self.start(timeout);
    }

    /// User activity: push the deadline out. Has no effect while disarmed.
    pub fn notify_activity(&self) {
        let mut state = self.lock();
        if state.token.is_some() {
            self.arm(&mut state);
        }
    }

    pub fn cancel(&self) {
        let mut state = self.lock();
        Self::disarm(&mut state);
    }

    pub fn is_armed(&self) -> bool {
        self.lock().token.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.lock().deadline
    }

    /// Returns whether a lock was requested.
    pub fn on_system_suspend(&self) -> bool {
        self.signal(LockReason::Suspend, |p| p.on_suspend)
    }

    /// Returns whether a lock was requested.
    pub fn on_screen_lock(&self) -> bool {
        self.signal(LockReason::ScreenLock, |p| p.on_screen_lock)
    }

    fn signal(&self, reason: LockReason, enabled: impl Fn(&AutoLockPolicy) -> bool) -> bool {
        let mut state = self.lock();
        if !state.policy.active || !enabled(&state.policy) {
            debug!("Ignoring {} signal, not enabled", reason);
            return false;
        }

        Self::disarm(&mut state);
        info!("Requesting lock on {}", reason);
        send_request(&self.tx, reason);
        true
    }

    fn arm(&self, state: &mut TimerState) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available, auto-lock timer not armed");
                return;
            }
        };

        Self::disarm(state);
        let token = CancellationToken::new();
        let generation = state.generation;
        let deadline = Instant::now() + state.policy.timeout;
        state.token = Some(token.clone());
        state.deadline = Some(deadline);

        let shared = Arc::clone(&self.state);
        let tx = self.tx.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                    if state.generation != generation {
                        // Superseded between waking and taking the lock.
                        return;
                    }
                    state.token = None;
                    state.deadline = None;
                    info!("Inactivity timeout elapsed");
                    send_request(&tx, LockReason::Inactivity);
                }
            }
        });
    }

    fn disarm(state: &mut TimerState) {
        state.generation = state.generation.wrapping_add(1);
        state.deadline = None;
        if let Some(token) = state.token.take() {
            token.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AutoLockScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn send_request(tx: &mpsc::Sender<LockRequest>, reason: LockReason) {
    match tx.try_send(LockRequest { reason }) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("Lock request queue full, a lock is already pending");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Lock request receiver dropped");
        }
    }
}
