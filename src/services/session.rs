//! Device session lifecycle: probe, map, open, configure, start
//!
//! Each logical device (note acceptor, coin acceptor) walks
//! `UNMAPPED -> MAPPED -> CONNECTING -> CONNECTED -> CONFIGURED ->
//! DISCONNECTED`. Probing pairs physical ports with SSP addresses using the
//! vendor's addressing scheme, opens each candidate with the acceptor
//! disabled, and closes it again before the real open. The two roles are
//! driven through independent call sequences; one missing device never
//! blocks the other.

use crate::domain::types::{DenomKey, DeviceId, DeviceMapping, DeviceRole, DeviceState};
use crate::error::{GatewayError, Result};
use crate::infra::config::Config;
use crate::io::api::{
    AcceptRoute, AttachedInterface, CurrencyAssignmentEntry, InhibitEntry, OpenConnectionRequest,
    RouteEntry, StatusEntry, WireDenomination,
};
use crate::io::client::DeviceClient;
use crate::services::classifier::{fallback_role, Classified, ModelNameClassifier, RoleClassifier};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// SSP address reserved for the first physical port
pub const FIRST_PORT_SSP_ADDRESS: u8 = 0;
/// Fixed offset address the vendor assigns to the second port
pub const SECOND_PORT_SSP_ADDRESS: u8 = 16;

/// (port, address) pair to try during probing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCandidate {
    pub port: String,
    pub ssp_address: u8,
}

/// The vendor addressing scheme reserves address 0 for the first attached
/// port and a fixed offset for the second; further ports are not part of the
/// scheme and are ignored.
pub fn probe_candidates(interfaces: &[AttachedInterface]) -> Vec<ProbeCandidate> {
    let mut candidates = Vec::new();
    if let Some(first) = interfaces.first() {
        candidates
            .push(ProbeCandidate { port: first.port.clone(), ssp_address: FIRST_PORT_SSP_ADDRESS });
    }
    if let Some(second) = interfaces.get(1) {
        candidates.push(ProbeCandidate {
            port: second.port.clone(),
            ssp_address: SECOND_PORT_SSP_ADDRESS,
        });
    }
    candidates
}

/// A half-open port reports an empty or placeholder model; neither is a
/// probe match.
pub fn is_placeholder_model(model: &str) -> bool {
    let trimmed = model.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown")
}

/// Live state of one logical device within the session
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub mapping: DeviceMapping,
    pub model: String,
    pub state: DeviceState,
    /// Last non-empty status report (empty reports carry no new information)
    pub status: Vec<StatusEntry>,
}

/// Steady-state capabilities of a connected acceptor, independent of which
/// role it fills. Both roles share the REST implementation; the seam exists
/// so callers never branch on device type.
#[async_trait]
pub trait AcceptorDevice: Send + Sync {
    fn device_id(&self) -> &DeviceId;
    fn role(&self) -> DeviceRole;
    async fn status(&self) -> Result<Vec<StatusEntry>>;
    async fn levels(&self) -> Result<Vec<CurrencyAssignmentEntry>>;
    async fn enable(&self, enable: bool) -> Result<()>;
    async fn dispense(&self, denom: &DenomKey) -> Result<()>;
}

pub struct RestAcceptor {
    client: Arc<DeviceClient>,
    role: DeviceRole,
    device_id: DeviceId,
}

#[async_trait]
impl AcceptorDevice for RestAcceptor {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    fn role(&self) -> DeviceRole {
        self.role
    }

    async fn status(&self) -> Result<Vec<StatusEntry>> {
        self.client.get_status(&self.device_id).await
    }

    async fn levels(&self) -> Result<Vec<CurrencyAssignmentEntry>> {
        self.client.get_currency_assignment(&self.device_id).await
    }

    async fn enable(&self, enable: bool) -> Result<()> {
        self.client.enable_acceptor(&self.device_id, enable).await
    }

    async fn dispense(&self, denom: &DenomKey) -> Result<()> {
        self.client
            .dispense_value(
                &self.device_id,
                &crate::io::api::DispenseRequest {
                    value: denom.value_minor,
                    currency: denom.currency.clone(),
                },
            )
            .await
    }
}

/// Owns the per-role device slots and drives the session lifecycle
pub struct SessionManager {
    client: Arc<DeviceClient>,
    classifier: Box<dyn RoleClassifier>,
    currency: String,
    recycler_values: Vec<i64>,
    note: RwLock<Option<DeviceSession>>,
    coin: RwLock<Option<DeviceSession>>,
}

impl SessionManager {
    pub fn new(client: Arc<DeviceClient>, config: &Config) -> Self {
        Self {
            client,
            classifier: Box::new(ModelNameClassifier::default()),
            currency: config.currency().to_string(),
            recycler_values: config.recycler_values().to_vec(),
            note: RwLock::new(None),
            coin: RwLock::new(None),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn RoleClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn slot(&self, role: DeviceRole) -> &RwLock<Option<DeviceSession>> {
        match role {
            DeviceRole::Note => &self.note,
            DeviceRole::Coin => &self.coin,
        }
    }

    async fn set_state(&self, role: DeviceRole, state: DeviceState) {
        let mut guard = self.slot(role).write().await;
        if let Some(session) = guard.as_mut() {
            debug!(
                role = %role,
                from = session.state.as_str(),
                to = state.as_str(),
                "device_state_changed"
            );
            session.state = state;
        }
    }

    pub async fn device_id(&self, role: DeviceRole) -> Option<DeviceId> {
        self.slot(role).read().await.as_ref().map(|s| s.mapping.device_id.clone())
    }

    pub async fn session(&self, role: DeviceRole) -> Option<DeviceSession> {
        self.slot(role).read().await.clone()
    }

    /// Devices currently at CONNECTED or CONFIGURED
    pub async fn connected(&self) -> Vec<(DeviceRole, DeviceId)> {
        let mut out = Vec::new();
        for role in [DeviceRole::Note, DeviceRole::Coin] {
            if let Some(session) = self.slot(role).read().await.as_ref() {
                if matches!(session.state, DeviceState::Connected | DeviceState::Configured) {
                    out.push((role, session.mapping.device_id.clone()));
                }
            }
        }
        out
    }

    /// Capability handle for a connected device
    pub async fn acceptor(&self, role: DeviceRole) -> Option<Arc<dyn AcceptorDevice>> {
        let device_id = self.device_id(role).await?;
        Some(Arc::new(RestAcceptor { client: self.client.clone(), role, device_id }))
    }

    /// Enumerate attached interfaces and probe the vendor's candidate
    /// (port, address) pairs with the acceptor disabled. Matches are mapped
    /// to roles and their probe connections closed immediately, so the real
    /// open that follows starts clean.
    pub async fn probe(&self) -> Result<Vec<DeviceMapping>> {
        *self.note.write().await = None;
        *self.coin.write().await = None;

        let interfaces = self.client.list_interfaces().await?;
        let candidates = probe_candidates(&interfaces);
        info!(
            interfaces = interfaces.len(),
            candidates = candidates.len(),
            "session_probe_started"
        );

        let mut mappings = Vec::new();
        let mut match_index = 0usize;

        for candidate in candidates {
            let request = OpenConnectionRequest {
                port: candidate.port.clone(),
                ssp_address: candidate.ssp_address,
                device_id: None,
                enable_acceptor: false,
                enable_auto_accept: false,
                enable_payout: false,
                inhibits: None,
                routes: None,
            };

            let response = match self.client.open_connection(&request, true).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(
                        port = %candidate.port,
                        ssp_address = candidate.ssp_address,
                        error = %e,
                        "session_probe_open_failed"
                    );
                    continue;
                }
            };

            let model = response.device_model.unwrap_or_default();
            let device_id = match response.device_id {
                Some(id) if !is_placeholder_model(&model) => DeviceId(id),
                _ => {
                    debug!(
                        port = %candidate.port,
                        ssp_address = candidate.ssp_address,
                        model = %model,
                        "session_probe_no_device"
                    );
                    continue;
                }
            };

            // The probe connection must not interfere with the real open.
            if let Err(e) = self.client.disconnect(&device_id).await {
                warn!(device = %device_id, error = %e, "session_probe_close_failed");
            }

            let role = match self.classifier.classify(&model) {
                Classified::Note => DeviceRole::Note,
                Classified::Coin => DeviceRole::Coin,
                Classified::Unknown => {
                    let fallback = fallback_role(match_index);
                    info!(
                        model = %model,
                        role = %fallback,
                        "session_probe_role_fallback"
                    );
                    fallback
                }
            };
            match_index += 1;

            let mut slot = self.slot(role).write().await;
            if slot.is_some() {
                warn!(role = %role, model = %model, "session_probe_duplicate_role");
                continue;
            }

            let mapping = DeviceMapping {
                role,
                port: candidate.port.clone(),
                ssp_address: candidate.ssp_address,
                device_id: device_id.clone(),
            };
            info!(
                role = %role,
                port = %candidate.port,
                ssp_address = candidate.ssp_address,
                device = %device_id,
                model = %model,
                "session_probe_matched"
            );
            *slot = Some(DeviceSession {
                mapping: mapping.clone(),
                model,
                state: DeviceState::Mapped,
                status: Vec::new(),
            });
            mappings.push(mapping);
        }

        Ok(mappings)
    }

    /// Open the mapped device for real: acceptor, auto-accept-escrow and
    /// payout enabled. A missing device id or unset open flag is a hard
    /// failure for this role; the sibling role is unaffected.
    pub async fn connect(&self, role: DeviceRole) -> Result<DeviceId> {
        let mapping = self
            .slot(role)
            .read()
            .await
            .as_ref()
            .map(|s| s.mapping.clone())
            .ok_or(GatewayError::DeviceUnavailable { role })?;

        self.set_state(role, DeviceState::Connecting).await;
        info!(
            role = %role,
            port = %mapping.port,
            ssp_address = mapping.ssp_address,
            "device_connecting"
        );

        let request = OpenConnectionRequest {
            port: mapping.port.clone(),
            ssp_address: mapping.ssp_address,
            device_id: Some(mapping.device_id.0.clone()),
            enable_acceptor: true,
            enable_auto_accept: true,
            enable_payout: true,
            inhibits: None,
            routes: None,
        };

        let response = match self.client.open_connection(&request, false).await {
            Ok(r) => r,
            Err(e) => {
                self.set_state(role, DeviceState::Mapped).await;
                return Err(e);
            }
        };

        if let Some(message) = response.error {
            self.set_state(role, DeviceState::Mapped).await;
            return Err(GatewayError::Hardware {
                op: "open_connection",
                device: mapping.device_id,
                message,
            });
        }

        let device_id = match response.device_id {
            Some(id) => DeviceId(id),
            None => {
                self.set_state(role, DeviceState::Mapped).await;
                return Err(GatewayError::protocol(
                    "open_connection",
                    "open returned no device id",
                ));
            }
        };
        if !response.is_open.unwrap_or(false) {
            self.set_state(role, DeviceState::Mapped).await;
            return Err(GatewayError::protocol(
                "open_connection",
                "device did not report open",
            ));
        }

        {
            let mut slot = self.slot(role).write().await;
            if let Some(session) = slot.as_mut() {
                session.mapping.device_id = device_id.clone();
                session.state = DeviceState::Connected;
                if let Some(model) = response.device_model {
                    session.model = model;
                }
            }
        }
        info!(role = %role, device = %device_id, "device_connected");

        // Configuration failure leaves the device usable on its power-on
        // defaults; start/enable are best-effort for the same reason. The
        // open connection is the only precondition later calls depend on.
        match self.configure(role).await {
            Ok(()) => self.set_state(role, DeviceState::Configured).await,
            Err(e) => warn!(role = %role, device = %device_id, error = %e, "device_configure_failed"),
        }

        if let Err(e) = self.client.start(&device_id).await {
            warn!(role = %role, device = %device_id, error = %e, "device_start_failed");
        }
        if let Err(e) = self.client.enable_acceptor(&device_id, true).await {
            warn!(role = %role, device = %device_id, error = %e, "acceptor_enable_failed");
        }

        Ok(device_id)
    }

    /// Push per-denomination inhibits and routes, both derived from the
    /// denominations the hardware actually reports: foreign-currency
    /// denominations are inhibited, configured change values route to the
    /// recycler, everything else to the cashbox. The two pushes are
    /// independent; one failing does not stop the other.
    pub async fn configure(&self, role: DeviceRole) -> Result<()> {
        let device_id = self
            .device_id(role)
            .await
            .ok_or(GatewayError::DeviceUnavailable { role })?;

        let entries = self.client.get_currency_assignment(&device_id).await?;
        if entries.is_empty() {
            warn!(role = %role, device = %device_id, "device_configure_no_denominations");
            return Ok(());
        }

        let inhibits: Vec<InhibitEntry> = entries
            .iter()
            .map(|e| InhibitEntry {
                denomination: WireDenomination { value: e.value, currency: e.currency.clone() },
                inhibit: e.currency != self.currency,
            })
            .collect();
        let routes: Vec<RouteEntry> = entries
            .iter()
            .map(|e| RouteEntry {
                denomination: WireDenomination { value: e.value, currency: e.currency.clone() },
                route: if e.currency == self.currency && self.recycler_values.contains(&e.value) {
                    AcceptRoute::Recycler
                } else {
                    AcceptRoute::Cashbox
                },
            })
            .collect();

        let inhibit_result = self.client.set_inhibits(&device_id, &inhibits).await;
        if let Err(e) = &inhibit_result {
            warn!(role = %role, device = %device_id, error = %e, "inhibit_push_failed");
        }
        let route_result = self.client.set_routes(&device_id, &routes).await;
        if let Err(e) = &route_result {
            warn!(role = %role, device = %device_id, error = %e, "route_push_failed");
        }

        info!(
            role = %role,
            device = %device_id,
            denominations = entries.len(),
            "device_configured"
        );
        inhibit_result.and(route_result)
    }

    /// Re-derive admission inhibits from the acceptable set: denominations
    /// outside it are inhibited at the hardware.
    pub async fn push_admission_inhibits(
        &self,
        role: DeviceRole,
        acceptable: &[DenomKey],
    ) -> Result<()> {
        let device_id = self
            .device_id(role)
            .await
            .ok_or(GatewayError::DeviceUnavailable { role })?;

        let entries = self.client.get_currency_assignment(&device_id).await?;
        let inhibits: Vec<InhibitEntry> = entries
            .iter()
            .map(|e| InhibitEntry {
                denomination: WireDenomination { value: e.value, currency: e.currency.clone() },
                inhibit: !acceptable.contains(&e.denom_key()),
            })
            .collect();
        self.client.set_inhibits(&device_id, &inhibits).await
    }

    /// Poll the device status, degrading to the cached report when the read
    /// fails or legitimately comes back empty.
    pub async fn refresh_status(&self, role: DeviceRole) -> Vec<StatusEntry> {
        let Some(device_id) = self.device_id(role).await else {
            return Vec::new();
        };

        match self.client.get_status(&device_id).await {
            Ok(entries) if !entries.is_empty() => {
                let mut slot = self.slot(role).write().await;
                if let Some(session) = slot.as_mut() {
                    session.status = entries.clone();
                }
                entries
            }
            Ok(_) => {
                debug!(role = %role, device = %device_id, "status_poll_empty");
                self.cached_status(role).await
            }
            Err(e) => {
                warn!(role = %role, device = %device_id, error = %e, "status_poll_failed");
                self.cached_status(role).await
            }
        }
    }

    async fn cached_status(&self, role: DeviceRole) -> Vec<StatusEntry> {
        self.slot(role).read().await.as_ref().map(|s| s.status.clone()).unwrap_or_default()
    }

    /// Tear down the device's session: best-effort disconnect call, then the
    /// slot (identifier, status cache, mapping) is cleared. Returns the id
    /// the device held so the caller can clear its accounting baseline.
    pub async fn disconnect(&self, role: DeviceRole) -> Option<DeviceId> {
        let session = self.slot(role).write().await.take()?;
        let device_id = session.mapping.device_id;

        if matches!(session.state, DeviceState::Connected | DeviceState::Configured) {
            if let Err(e) = self.client.disconnect(&device_id).await {
                warn!(role = %role, device = %device_id, error = %e, "device_disconnect_failed");
            }
        }
        info!(role = %role, device = %device_id, "device_disconnected");
        Some(device_id)
    }
}
