//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the incident relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Inbound incident webhook settings.
    pub webhook: WebhookConfig,

    /// Outbound signed delivery settings.
    pub transport: TransportConfig,

    /// Failure reporter settings (client side).
    pub reporter: ReporterConfig,

    /// Approval workflow policy.
    pub approval: ApprovalConfig,

    /// Real-time fan-out settings.
    pub realtime: RealtimeConfig,

    /// Downstream remediation collaborator.
    pub remediation: RemediationConfig,

    /// Session authentication.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Incident store persistence.
    pub storage: StorageConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Inbound webhook configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Empty means unsigned payloads are accepted.
    pub secret: String,

    /// Reject unsigned payloads even in development.
    pub require_signature: bool,

    /// Maximum accepted body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            require_signature: false,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Outbound delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Incident webhook endpoint the reporter delivers to.
    pub endpoint: String,

    /// Shared HMAC secret used to sign deliveries.
    pub secret: String,

    /// Number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    pub max_delay_ms: u64,

    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// User-Agent header sent with every delivery.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/webhook/incident".to_string(),
            secret: String::new(),
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            timeout_ms: 10_000,
            user_agent: concat!("incident-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Failure reporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Base URL artifacts (videos, traces) are served from.
    pub base_artifact_url: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            base_artifact_url: "http://localhost:8080/artifacts".to_string(),
        }
    }
}

/// Approval workflow configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// HMAC secret decisions are signed with. Generated at startup when empty.
    pub secret: String,

    /// TTL for low/medium/high priority requests, in seconds.
    pub default_ttl_secs: u64,

    /// TTL for critical priority requests, in seconds.
    pub critical_ttl_secs: u64,

    /// Expiry sweep interval in seconds.
    pub sweep_interval_secs: u64,

    /// Terminal incidents older than this are archived, in seconds.
    pub retention_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            default_ttl_secs: 30 * 60,
            critical_ttl_secs: 10 * 60,
            sweep_interval_secs: 5,
            retention_secs: 7 * 24 * 3600,
        }
    }
}

/// Real-time fan-out configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Per-session outbound queue depth. Events beyond it are dropped.
    pub session_buffer: usize,

    /// Socket write timeout in milliseconds. Slow sessions are closed.
    pub send_timeout_ms: u64,

    /// Observer client: initial reconnect delay in milliseconds.
    pub reconnect_base_ms: u64,

    /// Observer client: reconnect delay ceiling in milliseconds.
    pub reconnect_max_ms: u64,

    /// Observer client: attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            session_buffer: 64,
            send_timeout_ms: 1000,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 30_000,
            max_reconnect_attempts: 5,
        }
    }
}

/// Remediation collaborator configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RemediationConfig {
    /// Endpoint decisions are forwarded to. Empty disables forwarding.
    pub endpoint: String,

    /// HMAC secret for forwarded decisions.
    pub secret: String,
}

/// A dashboard user allowed to log in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub id: String,
    pub username: String,
    pub password: String,
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "operator".to_string()
}

/// Session authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Users allowed to log in.
    pub users: Vec<UserConfig>,

    /// Session lifetime in seconds.
    pub session_ttl_secs: u64,
}

impl AuthConfig {
    /// True while any admin/admin placeholder account can still log in.
    pub fn has_placeholder_credentials(&self) -> bool {
        self.users.iter().any(|u| u.username == "admin" && u.password == "admin")
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users: vec![UserConfig {
                id: "1".to_string(),
                username: "admin".to_string(),
                // WARNING: This is a placeholder! Change this in production.
                password: "admin".to_string(),
                name: "System Administrator".to_string(),
                role: "admin".to_string(),
            }],
            session_ttl_secs: 12 * 3600,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Incident store persistence.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot loaded at startup and written at shutdown.
    pub snapshot_path: Option<String>,
}
