//! HTTP surface of the relay.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (router, request ID, limits, tracing)
//!     → auth middleware (protected routes only)
//!     → handlers.rs (decode, call registry/coordinator)
//!     → error.rs (ApiError → JSON body with status + code)
//! ```

pub mod error;
pub mod handlers;
pub mod server;
pub mod tls;

pub use error::ApiError;
pub use server::{AppState, RelayServer};
