//! Shared types for the cash gateway core

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Newtype wrapper for the device identifier reported by the vendor service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DeviceId(pub String);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical role of a connected acceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Note,
    Coin,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Note => "note",
            DeviceRole::Coin => "coin",
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle state of a logical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unmapped,
    Mapped,
    Connecting,
    Connected,
    Configured,
    Disconnected,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Unmapped => "unmapped",
            DeviceState::Mapped => "mapped",
            DeviceState::Connecting => "connecting",
            DeviceState::Connected => "connected",
            DeviceState::Configured => "configured",
            DeviceState::Disconnected => "disconnected",
        }
    }
}

/// Denomination key: currency code plus face value in minor units.
///
/// All monetary values in the core are integer minor units; floats never
/// touch money.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DenomKey {
    pub currency: String,
    pub value_minor: i64,
}

impl DenomKey {
    pub fn new(currency: impl Into<String>, value_minor: i64) -> Self {
        Self { currency: currency.into(), value_minor }
    }
}

impl std::fmt::Display for DenomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.value_minor, self.currency)
    }
}

/// Mapping from a logical role to the physical port and SSP address it was
/// probed at. Owned by the session manager; invalidated on disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    pub role: DeviceRole,
    pub port: String,
    pub ssp_address: u8,
    pub device_id: DeviceId,
}

/// Point-in-time stock levels for one device.
///
/// Immutable once constructed; a later poll supersedes it rather than
/// mutating it. Counts are unsigned by construction, so the "never negative"
/// invariant holds at the type level.
#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    pub device_id: DeviceId,
    pub timestamp_ms: u64,
    counts: FxHashMap<DenomKey, u32>,
}

impl InventorySnapshot {
    pub fn new(device_id: DeviceId, counts: FxHashMap<DenomKey, u32>) -> Self {
        Self { device_id, timestamp_ms: epoch_ms(), counts }
    }

    /// Snapshot with no entries (used as the pre-baseline placeholder)
    pub fn empty(device_id: DeviceId) -> Self {
        Self::new(device_id, FxHashMap::default())
    }

    pub fn count(&self, denom: &DenomKey) -> u32 {
        self.counts.get(denom).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn denominations(&self) -> impl Iterator<Item = (&DenomKey, u32)> {
        self.counts.iter().map(|(k, &v)| (k, v))
    }

    /// Total stored value in minor units
    pub fn total_value(&self) -> i64 {
        self.counts.iter().map(|(k, &c)| k.value_minor * c as i64).sum()
    }

    /// Value deposited since `baseline`, in minor units.
    ///
    /// Per-denomination deltas are clamped at zero: a payout reduces stock
    /// and must not produce a negative contribution to "amount received".
    /// Returns the delta plus the denominations whose counts went backwards
    /// (discontinuities the caller may want to log).
    pub fn delta_since(&self, baseline: &InventorySnapshot) -> (i64, Vec<DenomKey>) {
        let mut delta = 0i64;
        let mut regressed = Vec::new();
        for (denom, &current) in &self.counts {
            let base = baseline.count(denom);
            if current >= base {
                delta += denom.value_minor * (current - base) as i64;
            } else {
                regressed.push(denom.clone());
            }
        }
        (delta, regressed)
    }
}
