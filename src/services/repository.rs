//! Repository facade over the cash-handling stack
//!
//! The kiosk application talks to this one type: start a cash session,
//! observe the amount received, query and push denomination admission,
//! dispense change, end the session. Underneath it wires together the
//! device client, the session manager, the amount accounting and the
//! background poller.

use crate::domain::admission::{acceptable, can_accept, AdmissionQuery};
use crate::domain::types::{DenomKey, DeviceId, DeviceRole};
use crate::error::{GatewayError, Result};
use crate::infra::config::{Config, SettingsStore, BASE_URL_KEY};
use crate::io::api::StatusEntry;
use crate::io::client::DeviceClient;
use crate::services::accounting::{AmountAccounting, AmountPoller};
use crate::services::session::{AcceptorDevice, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct CashRepository {
    config: Config,
    client: Arc<DeviceClient>,
    sessions: SessionManager,
    accounting: Arc<AmountAccounting>,
    poller: Mutex<Option<PollerHandle>>,
}

impl CashRepository {
    pub fn new(config: Config) -> Result<Self> {
        let client = Arc::new(DeviceClient::new(&config)?);
        let sessions = SessionManager::new(client.clone(), &config);
        let accounting = Arc::new(AmountAccounting::new(config.history_len()));
        Ok(Self { config, client, sessions, accounting, poller: Mutex::new(None) })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live accounting engine, for diagnostics surfaces
    pub fn accounting(&self) -> &AmountAccounting {
        &self.accounting
    }

    /// Persist the configured base URL so it survives a config-file redeploy
    pub fn persist_base_url(&self, store: &dyn SettingsStore) -> anyhow::Result<()> {
        store.put(BASE_URL_KEY, self.config.base_url())
    }

    /// Bring the cash session up: authenticate, probe and map the attached
    /// devices, open each mapped role, capture accounting baselines, and
    /// start the background amount poller. One role failing to open does not
    /// abort the other; only zero opened devices fails the session.
    pub async fn start_session(&self) -> Result<Vec<(DeviceRole, DeviceId)>> {
        self.client.authenticate().await?;

        let mappings = self.sessions.probe().await?;
        if mappings.is_empty() {
            return Err(GatewayError::protocol("probe", "no devices matched any candidate"));
        }

        let mut connected = Vec::new();
        let mut first_error = None;
        for mapping in &mappings {
            match self.sessions.connect(mapping.role).await {
                Ok(device_id) => connected.push((mapping.role, device_id)),
                Err(e) => {
                    warn!(role = %mapping.role, error = %e, "session_device_open_failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if connected.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| GatewayError::protocol("connect", "no device opened")));
        }

        for (role, device_id) in &connected {
            match self.client.get_currency_assignment(device_id).await {
                Ok(entries) => self.accounting.set_baseline(device_id, &entries),
                // The poller's first good read adopts the baseline instead.
                Err(e) => {
                    warn!(role = %role, device = %device_id, error = %e, "baseline_capture_failed")
                }
            }
        }

        self.start_poller(connected.clone()).await;
        info!(devices = connected.len(), "cash_session_started");
        Ok(connected)
    }

    async fn start_poller(&self, devices: Vec<(DeviceRole, DeviceId)>) {
        self.stop_poller().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = AmountPoller::new(
            self.client.clone(),
            self.accounting.clone(),
            devices,
            Duration::from_millis(self.config.poll_interval_ms()),
        );
        let task = tokio::spawn(poller.run(shutdown_rx));
        *self.poller.lock().await = Some(PollerHandle { shutdown: shutdown_tx, task });
    }

    async fn stop_poller(&self) {
        if let Some(handle) = self.poller.lock().await.take() {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
        }
    }

    /// Amount received this session, summed across devices, in minor units
    pub fn session_amount(&self) -> i64 {
        self.accounting.total_amount()
    }

    pub fn device_amount(&self, device: &DeviceId) -> i64 {
        self.accounting.session_amount(device)
    }

    /// Denominations worth accepting toward the given target amount
    pub fn acceptable_denominations(&self, target_minor: i64) -> Vec<DenomKey> {
        let supported = self.accounting.supported_denominations();
        let change = self.accounting.change_inventory();
        let query = AdmissionQuery {
            target: target_minor,
            paid: self.accounting.total_amount(),
            change_enabled: self.config.change_enabled(),
            change: &change,
        };
        acceptable(supported.iter(), &query)
    }

    pub fn can_accept(&self, denom: &DenomKey, target_minor: i64) -> bool {
        let change = self.accounting.change_inventory();
        let query = AdmissionQuery {
            target: target_minor,
            paid: self.accounting.total_amount(),
            change_enabled: self.config.change_enabled(),
            change: &change,
        };
        can_accept(denom, &query)
    }

    /// Mirror the current admission decision onto the hardware: every
    /// denomination outside the acceptable set is inhibited at the device,
    /// so unwanted money is rejected in the slot rather than counted and
    /// refunded. Push failures degrade to software-side admission.
    pub async fn push_admission(&self, target_minor: i64) -> Result<()> {
        let acceptable = self.acceptable_denominations(target_minor);
        let mut result = Ok(());
        for (role, _) in self.sessions.connected().await {
            if let Err(e) = self.sessions.push_admission_inhibits(role, &acceptable).await {
                warn!(role = %role, error = %e, "admission_push_failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub fn can_make_change(&self, amount_minor: i64) -> bool {
        self.accounting.change_inventory().can_make(amount_minor)
    }

    /// Dispense the given amount as change. Plans against the current
    /// payout-eligible stock, splits the plan across the devices that hold
    /// the units, and issues one dispense call per unit. A unit that fails
    /// mid-plan surfaces as the device's error; stock already paid out is
    /// recorded and the next poll re-synchronises exact levels.
    pub async fn dispense_change(&self, amount_minor: i64) -> Result<Vec<(DenomKey, u32)>> {
        if amount_minor == 0 {
            return Ok(Vec::new());
        }

        let inventory = self.accounting.change_inventory();
        let plan = inventory
            .plan_for(amount_minor)
            .ok_or(GatewayError::ChangeInfeasible { amount_minor })?;
        let allocation = self
            .accounting
            .allocate_plan(&plan)
            .ok_or(GatewayError::ChangeInfeasible { amount_minor })?;

        for (device_id, denom, units) in &allocation {
            for _ in 0..*units {
                self.client
                    .dispense_value(
                        device_id,
                        &crate::io::api::DispenseRequest {
                            value: denom.value_minor,
                            currency: denom.currency.clone(),
                        },
                    )
                    .await?;
                self.accounting.apply_dispense(device_id, denom, 1);
            }
        }

        info!(amount_minor, denominations = plan.len(), "change_dispensed");
        Ok(plan)
    }

    pub async fn refresh_status(&self, role: DeviceRole) -> Vec<StatusEntry> {
        self.sessions.refresh_status(role).await
    }

    /// Direct capability handle for one connected device, for callers that
    /// need device-level access beyond the session operations (maintenance
    /// screens, manual payout tooling).
    pub async fn acceptor(&self, role: DeviceRole) -> Option<Arc<dyn AcceptorDevice>> {
        self.sessions.acceptor(role).await
    }

    /// Re-push inhibits and routes derived from the device's live
    /// denomination table
    pub async fn reconfigure(&self, role: DeviceRole) -> Result<()> {
        self.sessions.configure(role).await
    }

    /// Explicit recovery from an amount discontinuity: current stock becomes
    /// the new baseline and the session amount restarts at zero.
    pub async fn rebaseline(&self, role: DeviceRole) {
        if let Some(device_id) = self.sessions.device_id(role).await {
            self.accounting.rebaseline(&device_id);
        }
    }

    /// Tear the session down: stop polling, disconnect both devices, drop
    /// their accounting state and the auth token.
    pub async fn end_session(&self) {
        self.stop_poller().await;
        for role in [DeviceRole::Note, DeviceRole::Coin] {
            if let Some(device_id) = self.sessions.disconnect(role).await {
                self.accounting.clear(&device_id);
            }
        }
        self.client.clear_token().await;
        info!("cash_session_ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::api::{AcceptRoute, CurrencyAssignmentEntry};

    fn entry(value: i64, stored: u32, in_recycler: u32) -> CurrencyAssignmentEntry {
        CurrencyAssignmentEntry {
            value,
            currency: "ISK".to_string(),
            stored,
            stored_in_cashbox: stored - in_recycler,
            stored_in_recycler: in_recycler,
            accept_route: if in_recycler > 0 {
                AcceptRoute::Recycler
            } else {
                AcceptRoute::Cashbox
            },
            is_inhibited: false,
        }
    }

    fn repo() -> CashRepository {
        CashRepository::new(Config::default()).unwrap()
    }

    #[test]
    fn test_admission_reflects_accounting() {
        let repo = repo();
        let dev = DeviceId("note-1".to_string());
        repo.accounting().set_baseline(
            &dev,
            &[entry(500, 0, 0), entry(1000, 0, 0), entry(100, 10, 10)],
        );

        // Target 600, nothing paid: 100 and 500 fit within the remainder,
        // 1000 overshoots but change (100s) covers the overpay.
        let acceptable = repo.acceptable_denominations(600);
        assert!(acceptable.contains(&DenomKey::new("ISK", 100)));
        assert!(acceptable.contains(&DenomKey::new("ISK", 500)));
        assert!(acceptable.contains(&DenomKey::new("ISK", 1000)));

        assert!(repo.can_accept(&DenomKey::new("ISK", 500), 600));
    }

    #[test]
    fn test_admission_without_change_stock() {
        let repo = repo();
        let dev = DeviceId("note-1".to_string());
        repo.accounting().set_baseline(&dev, &[entry(500, 0, 0), entry(1000, 0, 0)]);

        // No payout stock at all: overshooting denominations are refused.
        let acceptable = repo.acceptable_denominations(600);
        assert!(acceptable.contains(&DenomKey::new("ISK", 500)));
        assert!(!acceptable.contains(&DenomKey::new("ISK", 1000)));
    }

    #[test]
    fn test_change_feasibility_passthrough() {
        let repo = repo();
        let dev = DeviceId("coin-1".to_string());
        repo.accounting().set_baseline(&dev, &[entry(100, 4, 4)]);

        assert!(repo.can_make_change(300));
        assert!(!repo.can_make_change(500));
        assert!(repo.can_make_change(0));
    }

    #[tokio::test]
    async fn test_dispense_zero_is_empty_plan() {
        let repo = repo();
        let plan = repo.dispense_change(0).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_dispense_infeasible_amount() {
        let repo = repo();
        let err = repo.dispense_change(700).await.unwrap_err();
        assert!(matches!(err, GatewayError::ChangeInfeasible { amount_minor: 700 }));
    }
}
