//! Denomination admission decisions
//!
//! The central correctness property of the whole subsystem: never accept
//! money the kiosk cannot give back. Pure point-in-time queries - callers
//! must re-ask whenever the paid amount or the change inventory moves, and
//! nothing here is cached.

use crate::domain::change::ChangeInventory;
use crate::domain::types::DenomKey;

/// Inputs for one admission query
#[derive(Debug, Clone, Copy)]
pub struct AdmissionQuery<'a> {
    /// Amount due for the transaction, minor units
    pub target: i64,
    /// Amount already accepted this session, minor units
    pub paid: i64,
    /// Whether the kiosk is allowed to return change at all
    pub change_enabled: bool,
    /// Current payout-eligible stock
    pub change: &'a ChangeInventory,
}

/// Can this single denomination be accepted right now?
///
/// Rules, in order:
/// - nothing is accepted once the target is met or exceeded;
/// - with change disabled, a unit must be fully absorbed by the amount due;
/// - with change enabled, a unit that overpays is acceptable only when the
///   overpay is exactly constructible from the change inventory.
///
/// A rejection is a valid decision outcome, not an error.
pub fn can_accept(denom: &DenomKey, query: &AdmissionQuery<'_>) -> bool {
    let remaining = query.target - query.paid;
    if remaining <= 0 {
        return false;
    }
    if denom.value_minor <= 0 {
        return false;
    }
    if query.paid + denom.value_minor <= query.target {
        return true;
    }
    if !query.change_enabled {
        return false;
    }
    let overpay = (query.paid + denom.value_minor) - query.target;
    query.change.can_make(overpay)
}

/// The set of currently acceptable denominations out of those the hardware
/// supports. Order follows `supported`.
pub fn acceptable<'a>(
    supported: impl IntoIterator<Item = &'a DenomKey>,
    query: &AdmissionQuery<'_>,
) -> Vec<DenomKey> {
    supported
        .into_iter()
        .filter(|d| can_accept(d, query))
        .cloned()
        .collect()
}
