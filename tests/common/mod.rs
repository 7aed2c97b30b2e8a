//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use incident_relay::config::UserConfig;
use incident_relay::http::AppState;
use incident_relay::{RelayConfig, RelayServer, Shutdown};

pub const WEBHOOK_SECRET: &str = "hook-secret";
pub const APPROVAL_SECRET: &str = "decision-secret";

/// One request seen by a capture endpoint.
#[derive(Debug, Clone)]
pub struct Captured {
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
struct CaptureState {
    requests: Arc<Mutex<Vec<Captured>>>,
    status_for: Arc<dyn Fn(usize) -> u16 + Send + Sync>,
    delay: Duration,
}

/// A programmable receiver that records every request it gets.
pub struct CaptureEndpoint {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl CaptureEndpoint {
    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start an endpoint whose status for the n-th request (0-based) is
/// `status_for(n)`.
pub async fn start_capture_endpoint<F>(status_for: F) -> CaptureEndpoint
where
    F: Fn(usize) -> u16 + Send + Sync + 'static,
{
    start_delayed_endpoint(Duration::ZERO, status_for).await
}

/// Like `start_capture_endpoint`, but every response is held back by
/// `delay` after the request has been recorded.
pub async fn start_delayed_endpoint<F>(delay: Duration, status_for: F) -> CaptureEndpoint
where
    F: Fn(usize) -> u16 + Send + Sync + 'static,
{
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = CaptureState {
        requests: requests.clone(),
        status_for: Arc::new(status_for),
        delay,
    };

    async fn capture(State(state): State<CaptureState>, headers: HeaderMap, body: Bytes) -> StatusCode {
        let index = {
            let mut seen = state.requests.lock().unwrap();
            seen.push(Captured { headers, body });
            seen.len() - 1
        };
        if !state.delay.is_zero() {
            tokio::time::sleep(state.delay).await;
        }
        StatusCode::from_u16((state.status_for)(index)).unwrap()
    }

    let app = Router::new().fallback(capture).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    CaptureEndpoint { addr, requests }
}

/// A relay running on an ephemeral port.
pub struct RelayHandle {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
    _config_tx: mpsc::UnboundedSender<RelayConfig>,
}

impl RelayHandle {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.webhook.secret = WEBHOOK_SECRET.to_string();
    config.approval.secret = APPROVAL_SECRET.to_string();
    config.approval.sweep_interval_secs = 1;
    config.observability.metrics_enabled = false;
    config.auth.users = vec![
        UserConfig {
            id: "7".to_string(),
            username: "alice".to_string(),
            password: "wonderland".to_string(),
            name: "Alice".to_string(),
            role: "operator".to_string(),
        },
        UserConfig {
            id: "8".to_string(),
            username: "bob".to_string(),
            password: "builder".to_string(),
            name: "Bob".to_string(),
            role: "operator".to_string(),
        },
    ];
    config
}

pub async fn start_relay(config: RelayConfig) -> RelayHandle {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (config_tx, config_rx) = mpsc::unbounded_channel();
    let shutdown = Shutdown::new();

    let server = RelayServer::new(config);
    let state = server.state().clone();
    tokio::spawn(server.run(listener, config_rx, shutdown.subscribe()));

    RelayHandle {
        addr,
        state,
        shutdown,
        _config_tx: config_tx,
    }
}
