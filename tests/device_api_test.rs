//! Integration tests against a mock device service
//!
//! A small hyper server stands in for the vendor daemon: it issues bearer
//! tokens, enforces them on protected endpoints, and serves canned device
//! responses for two attached acceptors (one note, one coin). The tests
//! exercise the authorization retry behaviour at the client level and the
//! full session flow at the repository level.

use bytes::Bytes;
use cash_gateway::domain::types::{DenomKey, DeviceId, DeviceRole};
use cash_gateway::error::GatewayError;
use cash_gateway::infra::config::Config;
use cash_gateway::io::api::ReportedState;
use cash_gateway::io::client::{DeviceClient, REPLAY_HEADER};
use cash_gateway::services::repository::CashRepository;
use cash_gateway::services::session::AcceptorDevice;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";

struct ServerState {
    auth_calls: AtomicUsize,
    interface_calls: AtomicUsize,
    replayed_calls: AtomicUsize,
    dispense_calls: AtomicUsize,
    /// When set, every protected endpoint answers 401 even with a good token
    reject_all_protected: AtomicBool,
    /// When set, getStatus answers with an empty list
    status_empty: AtomicBool,
    /// When set, getStatus answers 500
    status_error: AtomicBool,
    /// Live recycler stock of the coin device's 100 ISK denomination
    coin_stock: Mutex<u32>,
}

impl ServerState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            auth_calls: AtomicUsize::new(0),
            interface_calls: AtomicUsize::new(0),
            replayed_calls: AtomicUsize::new(0),
            dispense_calls: AtomicUsize::new(0),
            reject_all_protected: AtomicBool::new(false),
            status_empty: AtomicBool::new(false),
            status_error: AtomicBool::new(false),
            coin_stock: Mutex::new(5),
        })
    }
}

fn json(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

async fn handle(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    if req.headers().contains_key(REPLAY_HEADER) {
        state.replayed_calls.fetch_add(1, Ordering::SeqCst);
    }
    if path == "/api/interfaces" {
        state.interface_calls.fetch_add(1, Ordering::SeqCst);
    }

    if path == "/api/authenticate" {
        state.auth_calls.fetch_add(1, Ordering::SeqCst);
        return Ok(json(StatusCode::OK, format!(r#"{{"token":"{TOKEN}"}}"#)));
    }

    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false);
    if state.reject_all_protected.load(Ordering::SeqCst) || !authorized {
        return Ok(json(StatusCode::UNAUTHORIZED, r#"{"error":"unauthorized"}"#.to_string()));
    }

    if path == "/api/interfaces" {
        return Ok(json(
            StatusCode::OK,
            r#"[{"port":"/dev/ttyACM0"},{"port":"/dev/ttyACM1"}]"#.to_string(),
        ));
    }

    if path == "/api/connections/open" {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let port = value["port"].as_str().unwrap_or_default();
        let response = if port == "/dev/ttyACM0" {
            r#"{"deviceId":"note-1","deviceModel":"NV200","isOpen":true}"#
        } else {
            r#"{"deviceId":"coin-1","deviceModel":"SMART Coin System","isOpen":true}"#
        };
        return Ok(json(StatusCode::OK, response.to_string()));
    }

    if let Some(rest) = path.strip_prefix("/api/devices/") {
        let mut parts = rest.splitn(2, '/');
        let device = parts.next().unwrap_or_default().to_string();
        let endpoint = parts.next().unwrap_or_default();
        return Ok(match endpoint {
            "start" | "acceptor" | "disconnect" | "inhibits" | "routes" => {
                json(StatusCode::OK, r#"{"success":true}"#.to_string())
            }
            "status" => {
                if state.status_error.load(Ordering::SeqCst) {
                    json(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"busy"}"#.to_string())
                } else if state.status_empty.load(Ordering::SeqCst) {
                    json(StatusCode::OK, "[]".to_string())
                } else {
                    json(StatusCode::OK, r#"[{"type":"acceptor","state":"idle"}]"#.to_string())
                }
            }
            "inventory" => {
                let body = if device == "coin-1" {
                    let stock = *state.coin_stock.lock().unwrap();
                    format!(r#"{{"entries":[{{"value":100,"stored":{stock},"currency":"ISK"}}]}}"#)
                } else {
                    r#"{"entries":[]}"#.to_string()
                };
                json(StatusCode::OK, body)
            }
            "currency-assignment" => {
                let body = if device == "coin-1" {
                    let stock = *state.coin_stock.lock().unwrap();
                    format!(
                        r#"[{{"value":100,"currency":"ISK","stored":{stock},"storedInCashbox":0,"storedInRecycler":{stock},"acceptRoute":"recycler","isInhibited":false}}]"#
                    )
                } else {
                    r#"[{"value":1000,"currency":"ISK","stored":0,"storedInCashbox":0,"storedInRecycler":0,"acceptRoute":"cashbox","isInhibited":false}]"#.to_string()
                };
                json(StatusCode::OK, body)
            }
            "dispense" => {
                state.dispense_calls.fetch_add(1, Ordering::SeqCst);
                let mut stock = state.coin_stock.lock().unwrap();
                *stock = stock.saturating_sub(1);
                json(StatusCode::OK, r#"{"success":true}"#.to_string())
            }
            _ => json(StatusCode::NOT_FOUND, r#"{"error":"no such endpoint"}"#.to_string()),
        });
    }

    Ok(json(StatusCode::NOT_FOUND, r#"{"error":"no such path"}"#.to_string()))
}

async fn spawn_server(state: Arc<ServerState>) -> String {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let state = state.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle(req, state.clone()));
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_authenticate_then_protected_call() {
    let state = ServerState::new();
    let base = spawn_server(state.clone()).await;
    let client = DeviceClient::new(&Config::default().with_base_url(base)).unwrap();

    client.authenticate().await.unwrap();
    let interfaces = client.list_interfaces().await.unwrap();

    assert_eq!(interfaces.len(), 2);
    assert_eq!(interfaces[0].port, "/dev/ttyACM0");
    assert_eq!(state.auth_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.replayed_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_token_triggers_single_replay() {
    let state = ServerState::new();
    let base = spawn_server(state.clone()).await;
    let client = DeviceClient::new(&Config::default().with_base_url(base)).unwrap();

    // No authenticate call first: the 401 recovery path acquires the token
    // and replays the original request exactly once.
    let interfaces = client.list_interfaces().await.unwrap();

    assert_eq!(interfaces.len(), 2);
    assert_eq!(state.auth_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.interface_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.replayed_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_persistent_401_is_never_retried_twice() {
    let state = ServerState::new();
    state.reject_all_protected.store(true, Ordering::SeqCst);
    let base = spawn_server(state.clone()).await;
    let client = DeviceClient::new(&Config::default().with_base_url(base)).unwrap();

    let err = client.list_interfaces().await.unwrap_err();
    assert!(matches!(err, GatewayError::Auth { .. }), "got {err}");

    // Original call plus its one replay; a replayed 401 is final.
    assert_eq!(state.interface_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.replayed_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_full_session_flow() {
    let state = ServerState::new();
    let base = spawn_server(state.clone()).await;
    let repo = CashRepository::new(Config::default().with_base_url(base)).unwrap();

    let connected = repo.start_session().await.unwrap();
    assert_eq!(connected.len(), 2);
    let roles: Vec<DeviceRole> = connected.iter().map(|(r, _)| *r).collect();
    assert!(roles.contains(&DeviceRole::Note));
    assert!(roles.contains(&DeviceRole::Coin));

    // Baselines captured against untouched stock: nothing received yet.
    assert_eq!(repo.session_amount(), 0);

    // Coin recycler holds 5x100; a 1000 note against a 900 target overpays
    // by a constructible 100.
    assert!(repo.can_make_change(300));
    let acceptable = repo.acceptable_denominations(900);
    assert!(acceptable.contains(&DenomKey::new("ISK", 100)));
    assert!(acceptable.contains(&DenomKey::new("ISK", 1000)));

    // Against a 950 target the 50 overpay is not constructible from 100s.
    let acceptable = repo.acceptable_denominations(950);
    assert!(!acceptable.contains(&DenomKey::new("ISK", 1000)));

    let status = repo.refresh_status(DeviceRole::Note).await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, ReportedState::Idle);

    // Device-level capability handle works for both roles.
    let coin = repo.acceptor(DeviceRole::Coin).await.unwrap();
    assert_eq!(coin.role(), DeviceRole::Coin);
    let levels = coin.levels().await.unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].stored_in_recycler, 5);
    coin.enable(false).await.unwrap();

    repo.end_session().await;
}

#[tokio::test]
async fn test_transport_error_carries_device() {
    // Nothing listens here; the connect fails before any HTTP exchange.
    let client =
        DeviceClient::new(&Config::default().with_base_url("http://127.0.0.1:9")).unwrap();

    let device = DeviceId("note-1".to_string());
    let err = client.get_status(&device).await.unwrap_err();
    match &err {
        GatewayError::Transport { op, device: Some(d), .. } => {
            assert_eq!(*op, "get_status");
            assert_eq!(d.0, "note-1");
        }
        other => panic!("expected device-scoped transport error, got {other}"),
    }
    assert!(err.to_string().contains("note-1"), "got {err}");
}

#[tokio::test]
async fn test_reauth_transport_error_fails_outer_call() {
    // A bare socket that serves exactly one 401 and then disappears: the
    // recovery path's authenticate call hits a dead address and that
    // transport failure becomes the outer call's error, with no replay.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(
                    b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                )
                .await;
        }
    });

    let client =
        DeviceClient::new(&Config::default().with_base_url(format!("http://{addr}"))).unwrap();
    let err = client.list_interfaces().await.unwrap_err();
    assert!(
        matches!(err, GatewayError::Transport { op: "authenticate", .. }),
        "got {err}"
    );
}

#[tokio::test]
async fn test_status_degrades_to_cached_report() {
    let state = ServerState::new();
    let base = spawn_server(state.clone()).await;
    let repo = CashRepository::new(Config::default().with_base_url(base)).unwrap();
    repo.start_session().await.unwrap();

    let status = repo.refresh_status(DeviceRole::Note).await;
    assert_eq!(status.len(), 1);

    // An empty report carries no new information; the cache stands.
    state.status_empty.store(true, Ordering::SeqCst);
    let status = repo.refresh_status(DeviceRole::Note).await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, ReportedState::Idle);

    // A failed read degrades the same way.
    state.status_empty.store(false, Ordering::SeqCst);
    state.status_error.store(true, Ordering::SeqCst);
    let status = repo.refresh_status(DeviceRole::Note).await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].state, ReportedState::Idle);

    repo.end_session().await;
}

#[tokio::test]
async fn test_inventory_levels() {
    let state = ServerState::new();
    let base = spawn_server(state.clone()).await;
    let client = DeviceClient::new(&Config::default().with_base_url(base)).unwrap();
    client.authenticate().await.unwrap();

    let inventory = client.get_inventory(&DeviceId("coin-1".to_string())).await.unwrap();
    assert_eq!(inventory.entries.len(), 1);
    assert_eq!(inventory.entries[0].value, 100);
    assert_eq!(inventory.entries[0].stored, 5);
    assert_eq!(inventory.entries[0].currency, "ISK");

    let inventory = client.get_inventory(&DeviceId("note-1".to_string())).await.unwrap();
    assert!(inventory.entries.is_empty());
}

#[tokio::test]
async fn test_dispense_change_flow() {
    let state = ServerState::new();
    let base = spawn_server(state.clone()).await;
    let repo = CashRepository::new(Config::default().with_base_url(base)).unwrap();

    repo.start_session().await.unwrap();

    let plan = repo.dispense_change(300).await.unwrap();
    let total: i64 = plan.iter().map(|(d, u)| d.value_minor * *u as i64).sum();
    assert_eq!(total, 300);
    assert_eq!(state.dispense_calls.load(Ordering::SeqCst), 3);

    // Stock moved from 5 to 2 units of 100: 200 stays feasible, 300 not.
    assert!(repo.can_make_change(200));
    assert!(!repo.can_make_change(300));

    let err = repo.dispense_change(300).await.unwrap_err();
    assert!(matches!(err, GatewayError::ChangeInfeasible { amount_minor: 300 }));

    repo.end_session().await;
}
