//! Session amount accounting over the hardware inventory feed
//!
//! The hardware has no "money received" counter; the authoritative source is
//! a live stock snapshot per device. This engine captures a baseline at
//! connection-open and turns later snapshots into a drift-tolerant session
//! amount: a failed or empty poll retains the previous figure (never a
//! regression to zero), and per-denomination deltas clamp at zero so payouts
//! cannot drive "amount received" negative.

use crate::domain::change::ChangeInventory;
use crate::domain::types::{epoch_ms, DenomKey, DeviceId, DeviceRole, InventorySnapshot};
use crate::io::api::{AcceptRoute, CurrencyAssignmentEntry};
use crate::io::client::DeviceClient;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// One observed per-denomination stock movement between consecutive good
/// polls, kept in a bounded history for diagnostics
#[derive(Debug, Clone)]
pub struct DeltaRecord {
    pub timestamp_ms: u64,
    pub denom: DenomKey,
    pub units: i64,
}

struct DeviceAccount {
    baseline: InventorySnapshot,
    last_good: InventorySnapshot,
    /// Current payout-eligible stock per denomination
    recycler: FxHashMap<DenomKey, u32>,
    /// Every denomination the device reported, intake-eligible or not
    supported: Vec<DenomKey>,
    amount_minor: i64,
    history: VecDeque<DeltaRecord>,
    discontinuities: u64,
}

fn parse_entries(
    device: &DeviceId,
    entries: &[CurrencyAssignmentEntry],
) -> (InventorySnapshot, FxHashMap<DenomKey, u32>, Vec<DenomKey>) {
    let mut counts = FxHashMap::default();
    let mut recycler = FxHashMap::default();
    let mut supported = Vec::with_capacity(entries.len());
    for entry in entries {
        let denom = entry.denom_key();
        counts.insert(denom.clone(), entry.stored);
        if entry.accept_route == AcceptRoute::Recycler || entry.stored_in_recycler > 0 {
            recycler.insert(denom.clone(), entry.stored_in_recycler);
        }
        supported.push(denom);
    }
    (InventorySnapshot::new(device.clone(), counts), recycler, supported)
}

/// Per-device baselines, last-known-good snapshots, and session amounts.
///
/// Guarded by a sync RwLock (the parking_lot pattern used for poll-updated
/// caches): writers never hold the lock across an await point.
pub struct AmountAccounting {
    history_len: usize,
    accounts: RwLock<FxHashMap<DeviceId, DeviceAccount>>,
}

impl AmountAccounting {
    pub fn new(history_len: usize) -> Self {
        Self { history_len, accounts: RwLock::new(FxHashMap::default()) }
    }

    /// Capture the pre-session stock for a freshly opened device. The
    /// baseline is immutable for the session unless the caller explicitly
    /// re-baselines.
    pub fn set_baseline(&self, device: &DeviceId, entries: &[CurrencyAssignmentEntry]) {
        let (snapshot, recycler, supported) = parse_entries(device, entries);
        info!(
            device = %device,
            denominations = supported.len(),
            baseline_value = snapshot.total_value(),
            "session_baseline_captured"
        );
        self.accounts.write().insert(
            device.clone(),
            DeviceAccount {
                last_good: snapshot.clone(),
                baseline: snapshot,
                recycler,
                supported,
                amount_minor: 0,
                history: VecDeque::new(),
                discontinuities: 0,
            },
        );
    }

    /// Fold one good poll into the account and return the device's session
    /// amount. Empty entry lists are transient reads: the previous amount is
    /// retained untouched.
    pub fn record_assignment(
        &self,
        device: &DeviceId,
        entries: &[CurrencyAssignmentEntry],
    ) -> i64 {
        if entries.is_empty() {
            let amount = self.session_amount(device);
            debug!(device = %device, amount_minor = amount, "amount_poll_empty");
            return amount;
        }

        let (snapshot, recycler, supported) = parse_entries(device, entries);

        let mut accounts = self.accounts.write();
        let account = match accounts.get_mut(device) {
            Some(a) => a,
            None => {
                // A poll for a device we never baselined: adopt this
                // snapshot as the baseline rather than inventing an amount.
                warn!(device = %device, "amount_poll_without_baseline");
                drop(accounts);
                self.set_baseline(device, entries);
                return 0;
            }
        };

        let (delta, regressed) = snapshot.delta_since(&account.baseline);
        for denom in &regressed {
            account.discontinuities += 1;
            warn!(
                device = %device,
                denom = %denom,
                baseline = account.baseline.count(denom),
                current = snapshot.count(denom),
                "amount_discontinuity"
            );
        }

        // Movement since the previous good poll, for the diagnostic trail.
        let now = epoch_ms();
        for (denom, current) in snapshot.denominations() {
            let previous = account.last_good.count(denom) as i64;
            let units = current as i64 - previous;
            if units != 0 {
                account.history.push_back(DeltaRecord {
                    timestamp_ms: now,
                    denom: denom.clone(),
                    units,
                });
            }
        }
        while account.history.len() > self.history_len {
            account.history.pop_front();
        }

        account.last_good = snapshot;
        account.recycler = recycler;
        account.supported = supported;
        account.amount_minor = delta;
        delta
    }

    /// A failed poll keeps the last accepted figure; callers log the cause.
    pub fn record_failure(&self, device: &DeviceId) -> i64 {
        self.session_amount(device)
    }

    pub fn session_amount(&self, device: &DeviceId) -> i64 {
        self.accounts.read().get(device).map(|a| a.amount_minor).unwrap_or(0)
    }

    /// Aggregate accepted amount across all connected devices
    pub fn total_amount(&self) -> i64 {
        self.accounts.read().values().map(|a| a.amount_minor).sum()
    }

    /// Union of denominations reported by all devices, deduplicated
    pub fn supported_denominations(&self) -> Vec<DenomKey> {
        let accounts = self.accounts.read();
        let mut all: Vec<DenomKey> =
            accounts.values().flat_map(|a| a.supported.iter().cloned()).collect();
        all.sort();
        all.dedup();
        all
    }

    /// Current payout-eligible stock, summed across devices
    pub fn change_inventory(&self) -> ChangeInventory {
        let accounts = self.accounts.read();
        let mut union: FxHashMap<DenomKey, u32> = FxHashMap::default();
        for account in accounts.values() {
            for (denom, &count) in &account.recycler {
                *union.entry(denom.clone()).or_insert(0) += count;
            }
        }
        ChangeInventory::from_counts(union)
    }

    /// Split a dispense plan across devices by who actually holds the units.
    /// Returns None when some planned units are not held anywhere (stale
    /// plan against moved stock).
    pub fn allocate_plan(
        &self,
        plan: &[(DenomKey, u32)],
    ) -> Option<Vec<(DeviceId, DenomKey, u32)>> {
        let accounts = self.accounts.read();
        let mut allocation = Vec::new();
        for (denom, units) in plan {
            let mut remaining = *units;
            for (device, account) in accounts.iter() {
                if remaining == 0 {
                    break;
                }
                let held = account.recycler.get(denom).copied().unwrap_or(0);
                if held > 0 {
                    let take = remaining.min(held);
                    allocation.push((device.clone(), denom.clone(), take));
                    remaining -= take;
                }
            }
            if remaining > 0 {
                return None;
            }
        }
        Some(allocation)
    }

    /// Record units that left a device's recycler after a successful
    /// dispense; the next good poll re-synchronises the exact levels.
    pub fn apply_dispense(&self, device: &DeviceId, denom: &DenomKey, units: u32) {
        let mut accounts = self.accounts.write();
        if let Some(account) = accounts.get_mut(device) {
            if let Some(count) = account.recycler.get_mut(denom) {
                *count = count.saturating_sub(units);
            }
        }
    }

    /// Adopt the last good snapshot as the new baseline, resetting the
    /// session amount. Exposed for explicit discontinuity recovery; never
    /// invoked automatically.
    pub fn rebaseline(&self, device: &DeviceId) {
        let mut accounts = self.accounts.write();
        if let Some(account) = accounts.get_mut(device) {
            info!(
                device = %device,
                previous_amount_minor = account.amount_minor,
                "session_rebaselined"
            );
            account.baseline = account.last_good.clone();
            account.amount_minor = 0;
        }
    }

    pub fn clear(&self, device: &DeviceId) {
        self.accounts.write().remove(device);
    }

    pub fn history(&self, device: &DeviceId) -> Vec<DeltaRecord> {
        self.accounts
            .read()
            .get(device)
            .map(|a| a.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn discontinuities(&self, device: &DeviceId) -> u64 {
        self.accounts.read().get(device).map(|a| a.discontinuities).unwrap_or(0)
    }
}

/// Repeating, cancellable poll of the per-device currency assignment.
///
/// Cancellation via the watch channel stops further polls; an in-flight
/// request finishes its normal error path first.
pub struct AmountPoller {
    client: Arc<DeviceClient>,
    accounting: Arc<AmountAccounting>,
    devices: Vec<(DeviceRole, DeviceId)>,
    poll_interval: Duration,
}

impl AmountPoller {
    pub fn new(
        client: Arc<DeviceClient>,
        accounting: Arc<AmountAccounting>,
        devices: Vec<(DeviceRole, DeviceId)>,
        poll_interval: Duration,
    ) -> Self {
        Self { client, accounting, devices, poll_interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            devices = self.devices.len(),
            poll_interval_ms = %self.poll_interval.as_millis(),
            "amount_poller_started"
        );

        let mut poll_timer = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("amount_poller_shutdown");
                        return;
                    }
                }
                _ = poll_timer.tick() => {}
            }

            for (role, device) in &self.devices {
                match self.client.get_currency_assignment(device).await {
                    Ok(entries) => {
                        let amount = self.accounting.record_assignment(device, &entries);
                        debug!(
                            role = %role,
                            device = %device,
                            amount_minor = amount,
                            "amount_poll"
                        );
                    }
                    Err(e) => {
                        let amount = self.accounting.record_failure(device);
                        warn!(
                            role = %role,
                            device = %device,
                            amount_minor = amount,
                            error = %e,
                            "amount_poll_failed"
                        );
                    }
                }
            }
        }
    }
}
