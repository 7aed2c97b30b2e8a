//! Trace correlation subsystem.
//!
//! # Data Flow
//! ```text
//! test runner injects traceparent into outgoing requests (context.rs)
//!     → backend spans carry the same trace id
//!     → test fails, TestExecutionResult handed to correlator.rs
//!     → trace id recovered from title / logs / attachments
//!     → FailurePayload.traceID links the failure to backend spans
//! ```

pub mod context;
pub mod correlator;

pub use context::{TraceContext, TraceId, TRACEPARENT};
pub use correlator::{TraceCorrelator, TraceSource};
