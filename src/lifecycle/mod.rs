//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! SIGTERM/SIGINT (signals.rs)
//!     → Shutdown::trigger (shutdown.rs)
//!     → server stops accepting, sweeper/forwarder/reload tasks exit
//!     → observer sockets closed, snapshot written
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
