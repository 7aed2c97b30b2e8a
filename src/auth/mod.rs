//! Session authentication.
//!
//! Users come from config; tokens are opaque random strings held in memory.
//! The same token authenticates REST calls (bearer header) and WebSocket
//! sessions (`authenticate` message).

pub mod middleware;
pub mod sessions;

pub use middleware::{bearer_token, require_session};
pub use sessions::{AuthError, Session, SessionStore, UserInfo};
