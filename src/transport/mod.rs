//! Secure transport subsystem.
//!
//! # Data Flow
//! ```text
//! FailurePayload / decision message
//!     → signature.rs (sha256=HMAC over canonical body)
//!     → sender.rs (POST with timeout)
//!     → backoff.rs (delay between failed attempts)
//!     → DeliveryReceipt | DeliveryError::Exhausted
//! ```
//!
//! # Design Decisions
//! - Every attempt has a deadline
//! - The same body and signature are reused across attempts
//! - Callers log and swallow `DeliveryError`; it never fails a test

pub mod backoff;
pub mod sender;
pub mod signature;

pub use sender::{AttemptError, DeliveryError, DeliveryReceipt, RetryPolicy, WebhookSender};
pub use signature::{hmac_hex, sign_body, verify_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
