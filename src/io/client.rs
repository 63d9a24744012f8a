//! HTTP client for the vendor device service
//!
//! Every outbound call goes through [`DeviceClient::send`], which owns the
//! authorization behaviour:
//! - protected endpoints get `Authorization: Bearer <token>` when a token is
//!   held; the authenticate endpoint itself never does
//! - a 401 on a non-replay drops the response, invalidates the token,
//!   re-authenticates with the construction-time credentials, and replays
//!   the original request exactly once with a replay marker
//! - a replayed request is never retried again, even on a second 401
//!
//! The single-slot token lives behind an async RwLock; exactly one token is
//! live at a time.

use crate::domain::types::DeviceId;
use crate::error::{GatewayError, Result};
use crate::infra::config::Config;
use crate::io::api::*;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Header attached to the single permitted replay of a 401'd request
pub const REPLAY_HEADER: &str = "x-replayed";

/// One outbound call, held in a replayable form (method + path + JSON body)
/// so the 401 path can re-issue it byte-for-byte.
#[derive(Debug, Clone)]
struct CallSpec {
    op: &'static str,
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    protected: bool,
    timeout: Duration,
    /// Device the call is scoped to, carried into transport failures
    device: Option<DeviceId>,
}

pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    request_timeout: Duration,
    probe_timeout: Duration,
    token: RwLock<Option<String>>,
}

impl DeviceClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms()))
            .build()
            .map_err(|e| GatewayError::protocol("client_build", e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            username: config.username().to_string(),
            password: config.password().to_string(),
            request_timeout: Duration::from_millis(config.request_timeout_ms()),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms()),
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange credentials for a fresh token. The login call is the one
    /// endpoint that never carries a bearer header.
    pub async fn authenticate(&self) -> Result<()> {
        let body = AuthenticateRequest {
            username: self.username.clone(),
            password: self.password.clone(),
        };
        let resp = self
            .http
            .post(self.url("/api/authenticate"))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::transport("authenticate", None, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Auth {
                op: "authenticate",
                reason: format!("service returned {status}"),
            });
        }

        let parsed: AuthenticateResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::protocol("authenticate", e.to_string()))?;

        *self.token.write().await = Some(parsed.token);
        info!("device_service_authenticated");
        Ok(())
    }

    /// Drop the held token (explicit logout or 401 recovery)
    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    #[cfg(test)]
    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn dispatch(&self, spec: &CallSpec, replay: bool) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .request(spec.method.clone(), self.url(&spec.path))
            .timeout(spec.timeout);

        if spec.protected {
            if let Some(token) = self.token.read().await.as_deref() {
                req = req.bearer_auth(token);
            }
        }
        if replay {
            req = req.header(REPLAY_HEADER, "1");
        }
        if let Some(body) = &spec.body {
            req = req.json(body);
        }

        req.send().await.map_err(|e| GatewayError::transport(spec.op, spec.device.clone(), e))
    }

    /// Send a call with retry-once-on-401 semantics. The final response,
    /// success or failure, is returned unmodified; only the single
    /// re-authentication cycle happens in between.
    async fn send(&self, spec: CallSpec) -> Result<reqwest::Response> {
        let resp = self.dispatch(&spec, false).await?;
        if resp.status() != StatusCode::UNAUTHORIZED || !spec.protected {
            return Ok(resp);
        }

        // Closes the failed response before re-authenticating.
        drop(resp);
        debug!(op = %spec.op, "auth_retry_started");
        self.clear_token().await;

        match self.authenticate().await {
            Ok(()) => {}
            // Network trouble during re-auth fails the outer call outright.
            Err(e @ GatewayError::Transport { .. }) => return Err(e),
            // Rejected credentials: the replay still happens, token-less,
            // and the upstream answer speaks for itself.
            Err(e) => warn!(op = %spec.op, error = %e, "reauthenticate_failed"),
        }

        self.dispatch(&spec, true).await
    }

    /// Send, insist on a 2xx, and decode the JSON body.
    async fn call_json<T: DeserializeOwned>(&self, spec: CallSpec) -> Result<T> {
        let op = spec.op;
        let resp = self.send(spec).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Auth {
                op,
                reason: "still unauthorized after re-authentication".to_string(),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::protocol(op, format!("http status {status}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::protocol(op, e.to_string()))
    }

    /// Send a control call and interpret its plain success/failure ack. A
    /// device-reported error string is a hardware fault for that device.
    async fn call_ack(&self, device: &DeviceId, spec: CallSpec) -> Result<()> {
        let op = spec.op;
        let ack: AckResponse = self.call_json(spec).await?;
        if ack.success {
            Ok(())
        } else {
            Err(GatewayError::Hardware {
                op,
                device: device.clone(),
                message: ack.error.unwrap_or_else(|| "unspecified device error".to_string()),
            })
        }
    }

    fn get(&self, op: &'static str, device: Option<&DeviceId>, path: String) -> CallSpec {
        CallSpec {
            op,
            method: Method::GET,
            path,
            body: None,
            protected: true,
            timeout: self.request_timeout,
            device: device.cloned(),
        }
    }

    fn post(
        &self,
        op: &'static str,
        device: Option<&DeviceId>,
        path: String,
        body: serde_json::Value,
    ) -> CallSpec {
        CallSpec {
            op,
            method: Method::POST,
            path,
            body: Some(body),
            protected: true,
            timeout: self.request_timeout,
            device: device.cloned(),
        }
    }

    // ---- typed endpoints ----

    pub async fn list_interfaces(&self) -> Result<Vec<AttachedInterface>> {
        self.call_json(self.get("list_interfaces", None, "/api/interfaces".to_string())).await
    }

    /// Open (or probe) a connection. Probes use the longer timeout because
    /// hardware connection establishment is slow.
    pub async fn open_connection(
        &self,
        request: &OpenConnectionRequest,
        probe: bool,
    ) -> Result<OpenConnectionResponse> {
        let body = serde_json::to_value(request)
            .map_err(|e| GatewayError::protocol("open_connection", e.to_string()))?;
        let mut spec = self.post("open_connection", None, "/api/connections/open".to_string(), body);
        if probe {
            spec.timeout = self.probe_timeout;
        }
        self.call_json(spec).await
    }

    pub async fn start(&self, device: &DeviceId) -> Result<()> {
        let spec = self.post(
            "start",
            Some(device),
            format!("/api/devices/{device}/start"),
            serde_json::json!({}),
        );
        self.call_ack(device, spec).await
    }

    pub async fn enable_acceptor(&self, device: &DeviceId, enable: bool) -> Result<()> {
        let spec = self.post(
            "enable_acceptor",
            Some(device),
            format!("/api/devices/{device}/acceptor"),
            serde_json::json!({ "enable": enable }),
        );
        self.call_ack(device, spec).await
    }

    pub async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        let spec = self.post(
            "disconnect",
            Some(device),
            format!("/api/devices/{device}/disconnect"),
            serde_json::json!({}),
        );
        self.call_ack(device, spec).await
    }

    pub async fn get_status(&self, device: &DeviceId) -> Result<Vec<StatusEntry>> {
        self.call_json(self.get(
            "get_status",
            Some(device),
            format!("/api/devices/{device}/status"),
        ))
        .await
    }

    pub async fn get_inventory(&self, device: &DeviceId) -> Result<InventoryResponse> {
        self.call_json(self.get(
            "get_inventory",
            Some(device),
            format!("/api/devices/{device}/inventory"),
        ))
        .await
    }

    pub async fn get_currency_assignment(
        &self,
        device: &DeviceId,
    ) -> Result<Vec<CurrencyAssignmentEntry>> {
        self.call_json(self.get(
            "get_currency_assignment",
            Some(device),
            format!("/api/devices/{device}/currency-assignment"),
        ))
        .await
    }

    pub async fn set_inhibits(&self, device: &DeviceId, entries: &[InhibitEntry]) -> Result<()> {
        let body = serde_json::to_value(entries)
            .map_err(|e| GatewayError::protocol("set_inhibits", e.to_string()))?;
        let spec = self.post(
            "set_inhibits",
            Some(device),
            format!("/api/devices/{device}/inhibits"),
            body,
        );
        self.call_ack(device, spec).await
    }

    pub async fn set_routes(&self, device: &DeviceId, entries: &[RouteEntry]) -> Result<()> {
        let body = serde_json::to_value(entries)
            .map_err(|e| GatewayError::protocol("set_routes", e.to_string()))?;
        let spec = self.post(
            "set_routes",
            Some(device),
            format!("/api/devices/{device}/routes"),
            body,
        );
        self.call_ack(device, spec).await
    }

    pub async fn dispense_value(&self, device: &DeviceId, request: &DispenseRequest) -> Result<()> {
        let body = serde_json::to_value(request)
            .map_err(|e| GatewayError::protocol("dispense_value", e.to_string()))?;
        let spec = self.post(
            "dispense_value",
            Some(device),
            format!("/api/devices/{device}/dispense"),
            body,
        );
        self.call_ack(device, spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let config = Config::default().with_base_url("http://127.0.0.1:5555/");
        let client = DeviceClient::new(&config).unwrap();
        assert_eq!(client.url("/api/interfaces"), "http://127.0.0.1:5555/api/interfaces");
    }

    #[tokio::test]
    async fn test_token_starts_absent() {
        let client = DeviceClient::new(&Config::default()).unwrap();
        assert!(!client.has_token().await);
        client.clear_token().await;
        assert!(!client.has_token().await);
    }
}
