//! Incident relay service.
//!
//! # Architecture Overview
//!
//! ```text
//!   test runner ──▶ reporting (correlate trace, build payload)
//!                       │
//!                       ▼ transport (HMAC sign, bounded retry)
//!   monitoring ─────▶ POST /webhook/incident
//!                       │
//!                       ▼
//!                  incidents (registry, per-incident lock, expiry sweep)
//!                       │                     ▲
//!                       │ events              │ decisions (bearer auth, HMAC verify)
//!                       ▼                     │
//!                  realtime (ws fan-out) ◀── approval (coordinator, audit, topic)
//!                                                 │
//!                                                 ▼ remediation endpoint
//! ```

use std::path::PathBuf;
use tokio::net::TcpListener;

use incident_relay::config::{load_config, watcher::ConfigWatcher};
use incident_relay::incidents::MemoryStore;
use incident_relay::lifecycle::wait_for_shutdown_signal;
use incident_relay::observability::{init_tracing, metrics};
use incident_relay::{RelayConfig, RelayServer, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RELAY_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "incident-relay starting");
    if let Some(path) = &config_path {
        tracing::info!(path = %path.display(), "Configuration loaded");
    } else {
        tracing::warn!("No config file given; running with defaults");
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        tls = config.listener.tls.is_some(),
        "Listener settings"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = match &config.storage.snapshot_path {
        Some(path) => MemoryStore::load_from_file(path)?,
        None => MemoryStore::new(),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    // The watcher stops when dropped; hold it until the server returns.
    let (_watcher, config_updates) = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => (None, tokio::sync::mpsc::unbounded_channel().1),
    };

    let shutdown = Shutdown::new();
    let server = RelayServer::with_store(config, store);
    let server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    wait_for_shutdown_signal().await;
    shutdown.trigger();
    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
