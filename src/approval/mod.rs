//! Approval workflow subsystem.
//!
//! # Data Flow
//! ```text
//! POST /api/approval/decision (bearer session)
//!     → coordinator.rs submit_decision (ordered checks under incident lock)
//!     → IncidentRegistry::apply_decision
//!     → audit.rs (approval_received)
//!     → topic.rs DecisionTopic → RemediationForwarder → remediation endpoint
//!     → EventSink (approval_decision)
//! ```
//!
//! # Design Decisions
//! - The coordinator never writes the store directly
//! - Decisions are only accepted over HTTP, never over the socket
//! - The decision secret can be rotated without a restart

pub mod audit;
pub mod coordinator;
pub mod stats;
pub mod topic;
pub mod types;

pub use audit::{AuditAction, AuditLog, AuditRecord};
pub use coordinator::{ApprovalCoordinator, DecisionError};
pub use stats::ApprovalStats;
pub use topic::{DecisionTopic, RemediationForwarder};
pub use types::{sign_decision, ApprovalDecision, Decision, RemediationMessage};
