//! HTTP client for the incident relay API.

mod client;

pub use client::{ApprovalRequest, DecisionBody, LoginResponse, RelayClient, SdkError, SIGNATURE_HEADER};
