//! Domain models - money, denominations, and pure decision logic
//!
//! This module contains the canonical data types and the pure functions the
//! rest of the system composes:
//! - `types` - DenomKey, InventorySnapshot, device identity and mapping
//! - `change` - payout-eligible stock and exact-change feasibility
//! - `admission` - per-denomination accept/reject decisions

pub mod admission;
pub mod change;
pub mod types;

// Re-export commonly used types
pub use admission::{acceptable, can_accept, AdmissionQuery};
pub use change::ChangeInventory;
pub use types::{
    epoch_ms, DenomKey, DeviceId, DeviceMapping, DeviceRole, DeviceState, InventorySnapshot,
};
