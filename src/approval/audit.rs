//! Append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    IncidentCreated,
    ApprovalRequested,
    ApprovalReceived,
    ApprovalExpired,
    InvestigationStarted,
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub action: AuditAction,
    pub incident_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub actor: String,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Shared handle to the audit trail. Records are never modified or removed.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &self,
        action: AuditAction,
        incident_id: &str,
        request_id: Option<&str>,
        actor: &str,
        details: Value,
    ) -> AuditRecord {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = AuditRecord {
            sequence: records.len() as u64 + 1,
            action,
            incident_id: incident_id.to_string(),
            request_id: request_id.map(str::to_string),
            actor: actor.to_string(),
            details,
            recorded_at: Utc::now(),
        };
        records.push(record.clone());
        tracing::debug!(
            sequence = record.sequence,
            action = ?action,
            incident_id = %incident_id,
            actor = %actor,
            "Audit record appended"
        );
        record
    }

    /// Records oldest first, optionally narrowed to one incident.
    pub fn records(&self, incident_id: Option<&str>) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .filter(|r| incident_id.map_or(true, |id| r.incident_id == id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
