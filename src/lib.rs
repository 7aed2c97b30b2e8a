//! Incident relay: failure correlation and human approval pipeline.

pub mod approval;
pub mod auth;
pub mod config;
pub mod correlation;
pub mod http;
pub mod incidents;
pub mod lifecycle;
pub mod observability;
pub mod realtime;
pub mod reporting;
pub mod transport;

pub use config::schema::RelayConfig;
pub use http::RelayServer;
pub use lifecycle::Shutdown;
