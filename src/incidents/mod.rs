//! Incident registry subsystem.
//!
//! # Data Flow
//! ```text
//! POST /webhook/incident ─→ IncidentSubmission (types.rs)
//!     → registry.rs create_incident_from (always pending)
//!         → store.rs (IncidentStore)
//!         → audit log, EventSink (new_incident)
//!
//! POST /api/approval/request → create_approval_request (one undecided per incident)
//!
//! sweeper.rs (interval) / GET /api/incidents (lazy)
//!     → sweep_expired(now) → expired + incident_update
//!     → archive_terminal(now, retention)
//! ```
//!
//! # Design Decisions
//! - Single writer per incident id (tokio mutex per key)
//! - The store only needs per-entry atomicity
//! - Snapshot persistence is optional and taken at shutdown

pub mod registry;
pub mod store;
pub mod sweeper;
pub mod types;

pub use registry::{AppliedDecision, IncidentGuard, IncidentRegistry, RegistryError, TtlPolicy};
pub use store::{IncidentStore, MemoryStore, StoreError};
pub use sweeper::ExpirySweeper;
pub use types::{
    ApprovalRequest, Incident, IncidentStatus, IncidentSubmission, Priority, ProposedAction,
    RequestState,
};
