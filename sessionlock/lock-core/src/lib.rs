//! PIN gate, brute-force lockout, auto-lock and secure erase for locally
//! stored session data.
//!
//! The host constructs a [`LockController`] with a [`LockConfig`] and a
//! secret backend, forwards activity and system signals to it, and only
//! shows protected content while [`LockController::is_content_accessible`]
//! returns true.

pub mod autolock;
pub mod clock;
pub mod controller;
pub mod error;
pub mod security;
pub mod storage;
pub mod vault;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use autolock::{LockReason, LockRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{LockConfig, LockController, LockEvent, ResetToken, UnlockOutcome, WipeTrigger};
pub use error::{Result, SessionLockError};
pub use security::{
    EraseError, EraseMethod, IntegrityReport, LockoutStatus, Partition, SecureEraser, WipeReport,
};
pub use storage::{SecuritySettings, SecuritySettingsPatch};
pub use vault::{LockState, StorageProtection};

/// Filter used by [`init_tracing`] when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "sessionlock_core=debug,sessionlock_secretstore=info";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Hosts with their own subscriber should skip this. Calling it again is a
/// no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
