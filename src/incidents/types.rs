//! Incident and approval request entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::TraceId;
use crate::reporting::{FailurePayload, TestError};

/// Lifecycle of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Pending,
    Investigating,
    Approved,
    Rejected,
    Expired,
}

impl IncidentStatus {
    /// Still awaiting a human decision.
    pub fn is_open(self) -> bool {
        matches!(self, IncidentStatus::Pending | IncidentStatus::Investigating)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Pending => "pending",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Approved => "approved",
            IncidentStatus::Rejected => "rejected",
            IncidentStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of an approval request; drives the default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// State of an approval request. Only `Pending` counts as undecided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RequestState {
    pub fn is_undecided(self) -> bool {
        self == RequestState::Pending
    }
}

/// Remediation suggested to the approver. Never executed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub target: String,
    pub description: String,
}

impl ProposedAction {
    /// Keyword heuristic over the title, then the reported severity.
    pub fn derive(title: &str, severity: Option<&str>, service: &str) -> Self {
        let title = title.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| title.contains(w));

        let (action_type, description) = if has(&["restart", "crash"]) {
            ("restart_pod", format!("Restart {service} pod to recover from crash or failure"))
        } else if has(&["memory", "oom"]) {
            ("scale_resources", format!("Scale up {service} resources to prevent OOM issues"))
        } else if has(&["database", "connection"]) {
            ("check_connectivity", format!("Verify database/service connectivity for {service}"))
        } else if has(&["http", "server error"]) {
            ("investigate_service", format!("Investigate HTTP errors and service health for {service}"))
        } else if severity.is_some_and(|s| s.eq_ignore_ascii_case("critical")) {
            ("immediate_escalation", format!("Critical issue requiring immediate attention for {service}"))
        } else {
            ("investigate", format!("Investigate and analyze {service} for potential issues"))
        };

        Self {
            action_type: action_type.to_string(),
            target: service.to_string(),
            description,
        }
    }
}

/// A detected failure awaiting or having received a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub classification: String,
    pub failing_service: String,
    pub summary: String,
    pub evidence: Vec<String>,
    pub proposed_action: ProposedAction,
    pub status: IncidentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_url: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_signature: Option<String>,
}

/// Time-bounded invitation to decide on one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub incident_id: String,
    pub priority: Priority,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Inbound webhook body.
///
/// Accepts the reporter's failure payload (camelCase) as well as the
/// pre-derived incident fields sent by monitoring and chaos senders.
/// A supplied `status` is only read as severity; incidents always start
/// `pending`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentSubmission {
    pub id: Option<String>,
    pub title: Option<String>,
    pub classification: Option<String>,
    pub failing_service: Option<String>,
    pub summary: Option<String>,
    pub evidence: Option<Vec<String>>,
    pub proposed_action: Option<ProposedAction>,
    pub source: Option<String>,
    #[serde(rename = "testTitle")]
    pub test_title: Option<String>,
    pub status: Option<String>,
    pub error: Option<TestError>,
    pub retries: Option<u32>,
    /// Rejected at decode time unless it is 32 hex characters; stored lowercase.
    #[serde(rename = "traceID", alias = "trace_id")]
    pub trace_id: Option<TraceId>,
    #[serde(rename = "videoUrl")]
    pub video_url: Option<String>,
    #[serde(rename = "traceUrl")]
    pub trace_url: Option<String>,
}

impl From<&FailurePayload> for IncidentSubmission {
    fn from(payload: &FailurePayload) -> Self {
        Self {
            test_title: Some(payload.test_title.clone()),
            status: serde_json::to_value(payload.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string)),
            error: payload.error.clone(),
            retries: Some(payload.retries),
            trace_id: Some(payload.trace_id.clone()),
            video_url: payload.video_url.clone(),
            trace_url: payload.trace_url.clone(),
            source: Some("test_reporter".to_string()),
            ..Self::default()
        }
    }
}

impl IncidentSubmission {
    /// Build the incident. Monitoring-style bodies (a `failing_service` or no
    /// `testTitle`) keep their fields; test failures get evidence derived
    /// from the error.
    pub fn into_incident(self, now: DateTime<Utc>) -> Incident {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("incident-{}", Uuid::new_v4().simple()));
        let is_test_failure = self.failing_service.is_none() && self.test_title.is_some();

        let (title, classification, failing_service, summary, evidence) = if is_test_failure {
            let title = self.title.or(self.test_title).unwrap_or_default();
            let message = self
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .filter(|m| !m.is_empty());
            let summary = self.summary.unwrap_or_else(|| {
                format!("Test failure: {}", message.unwrap_or("Unknown error"))
            });
            let trace_id = self.trace_id.as_ref().map(TraceId::as_str);
            let evidence = self
                .evidence
                .unwrap_or_else(|| test_evidence(self.status.as_deref(), self.error.as_ref(), self.retries, trace_id));
            (
                title,
                self.classification.unwrap_or_else(|| "Test Failure".to_string()),
                "test-service".to_string(),
                summary,
                evidence,
            )
        } else {
            (
                self.title.unwrap_or_else(|| "Unknown Incident".to_string()),
                self.classification.unwrap_or_else(|| "Backend Error".to_string()),
                self.failing_service.unwrap_or_else(|| "unknown-service".to_string()),
                self.summary.unwrap_or_else(|| "No description available".to_string()),
                self.evidence.unwrap_or_else(|| vec!["No evidence available".to_string()]),
            )
        };

        let proposed_action = self
            .proposed_action
            .unwrap_or_else(|| ProposedAction::derive(&title, self.status.as_deref(), &failing_service));

        Incident {
            id,
            title,
            classification,
            failing_service,
            summary,
            evidence,
            proposed_action,
            status: IncidentStatus::Pending,
            trace_id: self.trace_id.map(String::from),
            video_url: self.video_url,
            trace_url: self.trace_url,
            source: self.source.unwrap_or_else(|| "unknown".to_string()),
            created_at: now,
            updated_at: now,
            decided_by: None,
            decision_signature: None,
        }
    }
}

fn test_evidence(
    status: Option<&str>,
    error: Option<&TestError>,
    retries: Option<u32>,
    trace_id: Option<&str>,
) -> Vec<String> {
    let mut evidence = vec![format!("Test status: {}", status.unwrap_or("unknown"))];
    match error {
        Some(e) => {
            let message = if e.message.is_empty() { "No error message" } else { e.message.as_str() };
            evidence.push(format!("Error: {message}"));
            if let Some(kind) = &e.error_type {
                evidence.push(format!("Error type: {kind}"));
            }
            if let Some(frame) = e.stack.as_deref().and_then(|s| s.lines().find(|l| l.trim_start().starts_with("at "))) {
                evidence.push(format!("Top frame: {}", frame.trim()));
            }
        }
        None => evidence.push("Error: No error message".to_string()),
    }
    evidence.push(format!("Retries: {}", retries.unwrap_or(0)));
    if let Some(trace_id) = trace_id {
        evidence.push(format!("Trace ID: {trace_id}"));
    }
    evidence
}
