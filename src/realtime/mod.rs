//! Real-time fan-out subsystem.
//!
//! # Data Flow
//! ```text
//! IncidentRegistry / ApprovalCoordinator
//!     → EventSink::publish (events.rs)
//!     → broadcaster.rs (try_send per session, drop when full)
//!     → session.rs writer task (send timeout) → observer socket
//!
//! client.rs: observer side, capped reconnect then Resync
//! ```
//!
//! # Design Decisions
//! - Best-effort, at-most-once delivery; no replay log
//! - Sessions receive nothing until they authenticate or subscribe
//! - The socket is read-only for decisions

pub mod broadcaster;
pub mod client;
pub mod events;
pub mod messages;
pub mod session;

pub use broadcaster::{RealtimeBroadcaster, SessionId};
pub use client::{ClientError, ObserverClient, ObserverEvent, ReconnectPolicy};
pub use events::{Channel, EventKind, EventSink, NullSink, RecordingSink, RelayEvent};
pub use session::run_session;
