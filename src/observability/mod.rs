//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (logging.rs installs the subscriber)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape (when observability.metrics_enabled)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every HTTP span
//! - Recording without an installed exporter is a no-op

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
