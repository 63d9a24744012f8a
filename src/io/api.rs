//! Wire types for the vendor device-service REST surface
//!
//! The vendor service speaks camelCase JSON over the kiosk's local network.
//! We model its surface as-is rather than inventing a protocol; parsing is
//! deliberately tolerant because firmware revisions add state strings - an
//! unexpected enumerated value degrades to `Unknown`, never to a parse error.

use crate::domain::types::DenomKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub token: String,
}

/// One physical interface the service sees on the host
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedInterface {
    pub port: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
}

/// Denomination as the wire sees it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireDenomination {
    pub value: i64,
    pub currency: String,
}

impl From<&DenomKey> for WireDenomination {
    fn from(key: &DenomKey) -> Self {
        Self { value: key.value_minor, currency: key.currency.clone() }
    }
}

impl From<WireDenomination> for DenomKey {
    fn from(wire: WireDenomination) -> Self {
        DenomKey { currency: wire.currency, value_minor: wire.value }
    }
}

/// Destination for an accepted unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptRoute {
    Cashbox,
    Recycler,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InhibitEntry {
    pub denomination: WireDenomination,
    pub inhibit: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub denomination: WireDenomination,
    pub route: AcceptRoute,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenConnectionRequest {
    pub port: String,
    pub ssp_address: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub enable_acceptor: bool,
    pub enable_auto_accept: bool,
    pub enable_payout: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inhibits: Option<Vec<InhibitEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<RouteEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenConnectionResponse {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_model: Option<String>,
    #[serde(default)]
    pub is_open: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Plain success/failure signal shared by the control endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Device-reported state string, firmware-revision tolerant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedState {
    Idle,
    Escrow,
    Stacking,
    Dispensing,
    Disabled,
    Error,
    #[serde(other)]
    Unknown,
}

/// One entry from getStatus. An empty status list is "no new information",
/// not an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: ReportedState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub value: i64,
    pub stored: u32,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryResponse {
    #[serde(default)]
    pub entries: Vec<InventoryEntry>,
}

/// One entry from getCurrencyAssignment - the authoritative per-denomination
/// view: stock split by store, intake route, and inhibit flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyAssignmentEntry {
    pub value: i64,
    pub currency: String,
    #[serde(default)]
    pub stored: u32,
    #[serde(default)]
    pub stored_in_cashbox: u32,
    #[serde(default)]
    pub stored_in_recycler: u32,
    #[serde(default = "default_route")]
    pub accept_route: AcceptRoute,
    #[serde(default)]
    pub is_inhibited: bool,
}

fn default_route() -> AcceptRoute {
    AcceptRoute::Unknown
}

impl CurrencyAssignmentEntry {
    pub fn denom_key(&self) -> DenomKey {
        DenomKey::new(self.currency.clone(), self.value)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseRequest {
    pub value: i64,
    pub currency: String,
}
