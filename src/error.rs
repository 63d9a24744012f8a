//! Error taxonomy for the cash gateway
//!
//! Transport and authentication failures surface to the caller; read-path
//! protocol hiccups degrade to last-known-good values in the services that
//! own them and never reach this type. Admission rejections are decisions,
//! not errors, and have no variant here.

use crate::domain::types::{DeviceId, DeviceRole};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connect/timeout/unreachable while talking to the vendor service.
    #[error("transport failure in {op}{}: {source}", .device.as_ref().map(|d| format!(" (device {d})")).unwrap_or_default())]
    Transport {
        op: &'static str,
        device: Option<DeviceId>,
        #[source]
        source: reqwest::Error,
    },

    /// Credentials rejected, or a request still unauthorized after the one
    /// permitted re-authentication cycle.
    #[error("authentication failed in {op}: {reason}")]
    Auth { op: &'static str, reason: String },

    /// Malformed or unusable response body on a call that cannot degrade.
    #[error("protocol error in {op}: {detail}")]
    Protocol { op: &'static str, detail: String },

    /// Device-reported error string in a control response. Fatal for that
    /// device's session; never retried in a loop.
    #[error("device {device} fault in {op}: {message}")]
    Hardware { op: &'static str, device: DeviceId, message: String },

    /// No device fills the requested role (probe found nothing, or the
    /// session was disconnected).
    #[error("no {role} device available")]
    DeviceUnavailable { role: DeviceRole },

    /// Dispense was asked for an amount the current stock cannot compose.
    #[error("change for {amount_minor} minor units is not constructible")]
    ChangeInfeasible { amount_minor: i64 },
}

impl GatewayError {
    pub fn transport(op: &'static str, device: Option<DeviceId>, source: reqwest::Error) -> Self {
        GatewayError::Transport { op, device, source }
    }

    pub fn protocol(op: &'static str, detail: impl Into<String>) -> Self {
        GatewayError::Protocol { op, detail: detail.into() }
    }
}
