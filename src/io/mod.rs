//! IO modules - the vendor device service interface
//!
//! - `api` - wire types for the service's REST surface
//! - `client` - authorized HTTP client (bearer token, retry-once-on-401)

pub mod api;
pub mod client;

// Re-export commonly used types
pub use client::{DeviceClient, REPLAY_HEADER};
