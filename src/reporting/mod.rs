//! Failure reporting subsystem (runs inside the test process).
//!
//! # Data Flow
//! ```text
//! TestExecutionResult (types.rs, attachment kinds resolved on ingestion)
//!     → TraceCorrelator (trace id, never fails)
//!     → reporter.rs build() (failed / timedOut only)
//!     → WebhookSender (signed, retried)
//!     → failures logged, never surfaced as test failures
//! ```

pub mod reporter;
pub mod types;

pub use reporter::IncidentReporter;
pub use types::{
    Annotation, Attachment, AttachmentKind, FailurePayload, RawTestResult, TestError,
    TestExecutionResult, TestLocation, TestStatus,
};
