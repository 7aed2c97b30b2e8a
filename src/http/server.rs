//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the relay's subsystems from one `RelayConfig`
//! - Create the Axum router and wire middleware (tracing, limits, request ID)
//! - Spawn background tasks (expiry sweeper, remediation forwarder)
//! - Apply hot-reloaded config
//! - Serve plain or TLS, and drain on shutdown

use arc_swap::ArcSwap;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use rand::RngCore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::approval::{ApprovalCoordinator, AuditLog, DecisionTopic, RemediationForwarder};
use crate::auth::{require_session, SessionStore};
use crate::config::{RealtimeConfig, RelayConfig, WebhookConfig};
use crate::http::handlers;
use crate::http::tls::load_tls_config;
use crate::incidents::{ExpirySweeper, IncidentRegistry, MemoryStore, TtlPolicy};
use crate::realtime::RealtimeBroadcaster;
use crate::transport::{RetryPolicy, WebhookSender};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<IncidentRegistry>,
    pub coordinator: Arc<ApprovalCoordinator>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
    pub sessions: Arc<SessionStore>,
    pub webhook: Arc<ArcSwap<WebhookConfig>>,
    pub realtime: RealtimeConfig,
}

/// The incident relay service.
pub struct RelayServer {
    config: RelayConfig,
    state: AppState,
    store: MemoryStore,
    topic: DecisionTopic,
}

impl RelayServer {
    /// Create a server backed by an empty in-memory store.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Create a server over an existing store, e.g. one loaded from a snapshot.
    pub fn with_store(mut config: RelayConfig, store: MemoryStore) -> Self {
        if config.approval.secret.is_empty() {
            tracing::warn!("No approval secret configured; generated a random one for this process");
            config.approval.secret = random_secret();
        }
        if config.webhook.secret.is_empty() {
            tracing::warn!("No webhook secret configured; unsigned incident webhooks are accepted");
        }
        if config.auth.has_placeholder_credentials() {
            tracing::warn!("Default admin/admin login is enabled; configure auth.users before exposing the relay");
        }

        let broadcaster = Arc::new(RealtimeBroadcaster::new(config.realtime.session_buffer));
        let registry = Arc::new(
            IncidentRegistry::new(Arc::new(store.clone()), broadcaster.clone(), AuditLog::new())
                .with_ttl_policy(TtlPolicy::from(&config.approval)),
        );
        let topic = DecisionTopic::default();
        let coordinator = Arc::new(ApprovalCoordinator::new(
            registry.clone(),
            config.approval.secret.clone(),
            topic.clone(),
            broadcaster.clone(),
        ));

        let state = AppState {
            registry,
            coordinator,
            broadcaster,
            sessions: Arc::new(SessionStore::new(&config.auth)),
            webhook: Arc::new(ArcSwap::from_pointee(config.webhook.clone())),
            realtime: config.realtime.clone(),
        };

        Self { config, state, store, topic }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let state = self.state.clone();

        let protected = Router::new()
            .route("/api/approval/request", post(handlers::request_approval))
            .route("/api/approval/decision", post(handlers::submit_decision))
            .route("/api/incidents/{id}/investigate", post(handlers::investigate))
            .route("/api/audit", get(handlers::audit_log))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/auth/login", post(handlers::login))
            .route("/api/auth/logout", post(handlers::logout))
            .route("/webhook/incident", post(handlers::incident_webhook))
            .route("/api/incidents", get(handlers::list_incidents))
            .route("/api/incidents/{id}", get(handlers::get_incident))
            .route("/api/approval/stats", get(handlers::approval_stats))
            .route("/ws", get(handlers::websocket))
            .merge(protected)
            .with_state(state)
            .layer(DefaultBodyLimit::max(self.config.webhook.max_body_bytes))
            .layer(RequestBodyLimitLayer::new(self.config.webhook.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(ConcurrencyLimitLayer::new(self.config.listener.max_connections))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = ExpirySweeper::new(self.state.registry.clone(), &self.config.approval);
        tokio::spawn(sweeper.run(shutdown.resubscribe()));

        let sender = WebhookSender::new(self.config.transport.user_agent.clone());
        if let Some(forwarder) =
            RemediationForwarder::new(&self.config.remediation, RetryPolicy::from(&self.config.transport), sender)
        {
            tokio::spawn(forwarder.run(self.topic.subscribe(), shutdown.resubscribe()));
        }

        // config reloads and expired-session cleanup share one task
        let reload_state = self.state.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        let mut purge = tokio::time::interval(Duration::from_secs(60));
        purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            let mut updates_open = true;
            loop {
                tokio::select! {
                    update = config_updates.recv(), if updates_open => match update {
                        Some(config) => apply_config(&reload_state, &config),
                        None => updates_open = false,
                    },
                    _ = purge.tick() => {
                        let purged = reload_state.sessions.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "Expired sessions purged");
                        }
                    }
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        match &self.config.listener.tls {
            Some(tls) => {
                let rustls = load_tls_config(&PathBuf::from(&tls.cert_path), &PathBuf::from(&tls.key_path)).await?;
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    drain.graceful_shutdown(Some(Duration::from_secs(10)));
                });
                tracing::info!(address = %addr, "TLS enabled");
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("Shutdown signal received");
                    })
                    .await?;
            }
        }

        self.state.broadcaster.close_all();
        if let Some(path) = &self.config.storage.snapshot_path {
            if let Err(e) = self.store.save_to_file(path) {
                tracing::error!(path = %path, error = %e, "Failed to save incident snapshot");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Swap in the reloadable parts of a new config.
fn apply_config(state: &AppState, config: &RelayConfig) {
    state.webhook.store(Arc::new(config.webhook.clone()));
    state.registry.set_ttl_policy(TtlPolicy::from(&config.approval));
    state.sessions.update(&config.auth);
    if !config.approval.secret.is_empty() {
        state.coordinator.rotate_secret(config.approval.secret.clone());
    }
    tracing::info!("Configuration reloaded");
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn server() -> RelayServer {
        let mut config = RelayConfig::default();
        config.approval.secret = "k".into();
        RelayServer::new(config)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = server()
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["websocket_connections"], 0);
    }

    #[tokio::test]
    async fn test_protected_routes_require_session() {
        let response = server()
            .router()
            .oneshot(
                Request::post("/api/approval/request")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"incident_id":"i-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "missing_token");
    }

    #[tokio::test]
    async fn test_malformed_json_is_validation_error() {
        let server = server();
        let token = server.state().sessions.login("admin", "admin").unwrap().token;
        let response = server
            .router()
            .oneshot(
                Request::post("/api/approval/decision")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(r#"{"request_id": 5}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_unsigned_webhook_accepted_without_secret() {
        let server = server();
        let response = server
            .router()
            .oneshot(
                Request::post("/webhook/incident")
                    .header("content-type", "application/json")
                    .header("traceparent", "00-deadbeefdeadbeefdeadbeefdeadbeef-aabbccddeeff0011-01")
                    .body(Body::from(r#"{"testTitle":"checkout","status":"failed","retries":0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = body_json(response).await["incident_id"].as_str().unwrap().to_string();
        let incident = server.state().registry.incident(&id).unwrap();
        assert_eq!(incident.trace_id.as_deref(), Some("deadbeefdeadbeefdeadbeefdeadbeef"));
    }

    #[tokio::test]
    async fn test_webhook_rejects_malformed_trace_id() {
        let server = server();
        let response = server
            .router()
            .oneshot(
                Request::post("/webhook/incident")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"testTitle":"checkout","status":"failed","traceID":"NOT-A-TRACE"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "validation_error");
        assert!(server.state().registry.incidents().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_lowercases_trace_id() {
        let server = server();
        let response = server
            .router()
            .oneshot(
                Request::post("/webhook/incident")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"testTitle":"checkout","status":"failed","traceID":"0AF7651916CD43DD8448EB211C80319C"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = body_json(response).await["incident_id"].as_str().unwrap().to_string();
        let incident = server.state().registry.incident(&id).unwrap();
        assert_eq!(incident.trace_id.as_deref(), Some("0af7651916cd43dd8448eb211c80319c"));
    }

    #[tokio::test]
    async fn test_signed_webhook_required_with_secret() {
        let mut config = RelayConfig::default();
        config.webhook.secret = "s3cret".into();
        let server = RelayServer::new(config);
        let body = r#"{"testTitle":"checkout","status":"failed","retries":0}"#;

        let unsigned = server
            .router()
            .oneshot(Request::post("/webhook/incident").body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

        let signature = crate::transport::sign_body("s3cret", body.as_bytes()).unwrap();
        let signed = server
            .router()
            .oneshot(
                Request::post("/webhook/incident")
                    .header("x-webhook-signature", signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(signed.status(), StatusCode::OK);
    }

    #[test]
    fn test_missing_approval_secret_is_generated() {
        let server = RelayServer::new(RelayConfig::default());
        assert_eq!(server.config().approval.secret.len(), 64);
    }
}
