//! Approval decision types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::incidents::{IncidentStatus, RequestState};
use crate::transport::hmac_hex;

/// The two human verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }

    pub fn incident_status(self) -> IncidentStatus {
        match self {
            Decision::Approve => IncidentStatus::Approved,
            Decision::Reject => IncidentStatus::Rejected,
        }
    }

    pub fn request_state(self) -> RequestState {
        match self {
            Decision::Approve => RequestState::Approved,
            Decision::Reject => RequestState::Rejected,
        }
    }
}

/// A signed human decision on one approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub request_id: String,
    pub decision: Decision,
    pub user_id: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalDecision {
    /// Compact JSON with sorted keys over the signed fields.
    ///
    /// The timestamp is rendered RFC 3339 UTC with millisecond precision so
    /// signer and verifier agree on the bytes.
    pub fn canonical_bytes(
        request_id: &str,
        decision: Decision,
        user_id: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<u8> {
        let fields: BTreeMap<&str, Value> = BTreeMap::from([
            ("decision", Value::from(decision.as_str())),
            ("request_id", Value::from(request_id)),
            ("timestamp", Value::from(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))),
            ("user_id", Value::from(user_id)),
        ]);
        // a map of strings always serializes
        serde_json::to_vec(&fields).unwrap_or_default()
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        Self::canonical_bytes(&self.request_id, self.decision, &self.user_id, &self.timestamp)
    }
}

/// Sign a decision the way the coordinator verifies it. Returns lowercase hex.
pub fn sign_decision(
    secret: &str,
    request_id: &str,
    decision: Decision,
    user_id: &str,
    timestamp: &DateTime<Utc>,
) -> String {
    hmac_hex(
        secret.as_bytes(),
        &ApprovalDecision::canonical_bytes(request_id, decision, user_id, timestamp),
    )
}

/// Message published on the remediation topic for every accepted decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationMessage {
    pub request_id: String,
    pub incident_id: String,
    pub decision: Decision,
    pub decided_by: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub proposed_action: crate::incidents::ProposedAction,
    pub decided_at: DateTime<Utc>,
}
