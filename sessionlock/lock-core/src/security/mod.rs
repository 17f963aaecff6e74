pub mod crypto;
pub mod eraser;
pub mod integrity;
pub mod lockout;
mod partition;

pub use eraser::{EraseError, EraseMethod, EraseReport, SecureEraser, WipeReport};
pub use integrity::{
    IntegrityReport, PartitionCheck, PartitionStatus, SessionHashSnapshot, SessionIntegrityGuard,
};
pub use lockout::{
    AttemptState, FailureOutcome, LockoutConfig, LockoutPolicy, LockoutStatus,
    DEFAULT_DELAY_TIERS,
};
pub use partition::Partition;
