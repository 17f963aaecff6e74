mod config;
pub mod keys;
mod store;

pub use config::{SecuritySettings, SecuritySettingsPatch};
pub use store::{StateBatch, StateStore, STATE_FILE_NAME};
