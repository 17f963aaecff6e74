//! Automatic locking on inactivity and system signals.

mod scheduler;

pub use scheduler::{AutoLockPolicy, AutoLockScheduler, LockReason, LockRequest};
