//! Infrastructure - configuration and durable settings
//!
//! - `config` - TOML configuration, defaults, and the key-value settings
//!   store that persists the device-service base URL

pub mod config;

// Re-export commonly used types
pub use config::{resolve_base_url, Config, FileSettingsStore, SettingsStore, BASE_URL_KEY};
