//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → shared via ArcSwap to handlers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<RelayConfig>, decision secret rotated
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApprovalConfig, AuthConfig, ListenerConfig, ObservabilityConfig, RealtimeConfig, RelayConfig,
    RemediationConfig, ReporterConfig, StorageConfig, TimeoutConfig, TlsConfig, TransportConfig, UserConfig,
    WebhookConfig,
};
