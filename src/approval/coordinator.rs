//! Validates human decisions and applies them through the registry.
//!
//! # Decision Checks
//! ```text
//! request exists            → else UnknownRequest
//! now < expires_at          → else RequestExpired
//! request undecided         → else RequestAlreadyDecided
//! HMAC matches (const time) → else InvalidSignature
//! ```
//! All four run under the incident's lock, so of two concurrent decisions on
//! one request exactly one is applied.

use arc_swap::ArcSwap;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::approval::audit::AuditAction;
use crate::approval::topic::DecisionTopic;
use crate::approval::types::{ApprovalDecision, RemediationMessage};
use crate::incidents::{Incident, IncidentRegistry, RegistryError, RequestState};
use crate::observability::metrics;
use crate::realtime::events::{EventKind, EventSink, RelayEvent};
use crate::transport::verify_signature;

/// Rejected decision. Returned as a value, never raised past the API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("unknown approval request {0}")]
    UnknownRequest(String),

    #[error("approval request {0} has expired")]
    RequestExpired(String),

    #[error("approval request {0} was already decided")]
    RequestAlreadyDecided(String),

    #[error("decision signature does not verify")]
    InvalidSignature,

    /// Unexpected concurrent mutation; only this decision fails.
    #[error("state conflict: {0}")]
    Conflict(String),
}

impl DecisionError {
    /// Stable snake_case code for API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DecisionError::UnknownRequest(_) => "unknown_request",
            DecisionError::RequestExpired(_) => "request_expired",
            DecisionError::RequestAlreadyDecided(_) => "request_already_decided",
            DecisionError::InvalidSignature => "invalid_signature",
            DecisionError::Conflict(_) => "state_conflict",
        }
    }
}

pub struct ApprovalCoordinator {
    registry: Arc<IncidentRegistry>,
    secret: ArcSwap<String>,
    topic: DecisionTopic,
    events: Arc<dyn EventSink>,
}

impl ApprovalCoordinator {
    pub fn new(
        registry: Arc<IncidentRegistry>,
        secret: impl Into<String>,
        topic: DecisionTopic,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            secret: ArcSwap::from_pointee(secret.into()),
            topic,
            events,
        }
    }

    /// Swap the verification secret. Decisions in flight finish with the
    /// secret they loaded.
    pub fn rotate_secret(&self, secret: impl Into<String>) {
        self.secret.store(Arc::new(secret.into()));
        tracing::info!("Decision secret rotated");
    }

    pub fn topic(&self) -> &DecisionTopic {
        &self.topic
    }

    pub async fn submit_decision(&self, decision: &ApprovalDecision) -> Result<Incident, DecisionError> {
        let result = self.try_submit(decision).await;
        let outcome = match &result {
            Ok(_) => decision.decision.as_str(),
            Err(e) => e.code(),
        };
        metrics::record_decision(outcome);
        if let Err(e) = &result {
            tracing::warn!(
                request_id = %decision.request_id,
                user_id = %decision.user_id,
                code = e.code(),
                "Decision rejected"
            );
        }
        result
    }

    async fn try_submit(&self, decision: &ApprovalDecision) -> Result<Incident, DecisionError> {
        let request_id = decision.request_id.as_str();
        let unknown = || DecisionError::UnknownRequest(request_id.to_string());

        let incident_id = self.registry.request(request_id).ok_or_else(unknown)?.incident_id;
        let guard = self.registry.lock_incident(&incident_id).await;
        // re-read under the lock; the sweeper or another decision may have won
        let request = self.registry.request(request_id).ok_or_else(unknown)?;

        let now = Utc::now();
        if request.state == RequestState::Expired || request.is_past_deadline(now) {
            return Err(DecisionError::RequestExpired(request_id.to_string()));
        }
        if !request.state.is_undecided() {
            return Err(DecisionError::RequestAlreadyDecided(request_id.to_string()));
        }

        let secret = self.secret.load_full();
        if !verify_signature(secret.as_bytes(), &decision.signing_bytes(), &decision.signature) {
            return Err(DecisionError::InvalidSignature);
        }

        let applied = self
            .registry
            .apply_decision(&guard, request_id, decision.decision, &decision.user_id, &decision.signature, now)
            .map_err(|e| match e {
                RegistryError::UnknownRequest(_) => unknown(),
                other => DecisionError::Conflict(other.to_string()),
            })?;
        drop(guard);

        let incident = applied.incident;
        self.registry.audit().append(
            AuditAction::ApprovalReceived,
            &incident.id,
            Some(request_id),
            &decision.user_id,
            json!({
                "decision": decision.decision,
                "user_name": decision.user_name,
                "reason": decision.reason,
                "signature": decision.signature,
            }),
        );

        let delivered = self.topic.publish(RemediationMessage {
            request_id: request_id.to_string(),
            incident_id: incident.id.clone(),
            decision: decision.decision,
            decided_by: decision.user_id.clone(),
            user_name: decision.user_name.clone(),
            reason: decision.reason.clone(),
            proposed_action: incident.proposed_action.clone(),
            decided_at: now,
        });

        self.events.publish(RelayEvent::new(
            EventKind::ApprovalDecision,
            json!({
                "request_id": request_id,
                "incident_id": incident.id,
                "decision": decision.decision,
                "decided_by": decision.user_id,
                "user_name": decision.user_name,
                "reason": decision.reason,
                "incident": &incident,
            }),
        ));

        tracing::info!(
            incident_id = %incident.id,
            request_id = %request_id,
            decision = decision.decision.as_str(),
            user_id = %decision.user_id,
            remediation_subscribers = delivered,
            "Decision applied"
        );
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::audit::AuditLog;
    use crate::approval::types::{sign_decision, Decision};
    use crate::incidents::{IncidentStatus, IncidentSubmission, MemoryStore, Priority};
    use crate::realtime::events::RecordingSink;
    use chrono::DateTime;
    use std::time::Duration;

    const SECRET: &str = "decision-secret";

    struct Fixture {
        registry: Arc<IncidentRegistry>,
        coordinator: Arc<ApprovalCoordinator>,
        sink: RecordingSink,
    }

    fn fixture() -> Fixture {
        let sink = RecordingSink::new();
        let registry = Arc::new(IncidentRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(sink.clone()),
            AuditLog::new(),
        ));
        let coordinator = Arc::new(ApprovalCoordinator::new(
            registry.clone(),
            SECRET,
            DecisionTopic::default(),
            Arc::new(sink.clone()),
        ));
        Fixture { registry, coordinator, sink }
    }

    async fn open_request(registry: &IncidentRegistry, ttl: Duration) -> String {
        registry
            .create_incident_from(IncidentSubmission {
                id: Some("i-1".into()),
                title: Some("Pod crash".into()),
                failing_service: Some("cart".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        registry
            .create_approval_request("i-1", Priority::High, Some(ttl), "1")
            .await
            .unwrap()
            .request_id
    }

    fn decision(request_id: &str, verdict: Decision, secret: &str) -> ApprovalDecision {
        let timestamp: DateTime<Utc> = Utc::now();
        ApprovalDecision {
            request_id: request_id.into(),
            decision: verdict,
            user_id: "1".into(),
            user_name: "Admin".into(),
            reason: Some("looks right".into()),
            signature: sign_decision(secret, request_id, verdict, "1", &timestamp),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_approve_applies_and_notifies() {
        let f = fixture();
        let request_id = open_request(&f.registry, Duration::from_secs(60)).await;
        let mut remediation = f.coordinator.topic().subscribe();

        let incident = f
            .coordinator
            .submit_decision(&decision(&request_id, Decision::Approve, SECRET))
            .await
            .unwrap();

        assert_eq!(incident.status, IncidentStatus::Approved);
        assert_eq!(incident.decided_by.as_deref(), Some("1"));
        assert!(incident.decision_signature.is_some());
        assert_eq!(remediation.recv().await.unwrap().decision, Decision::Approve);
        assert_eq!(f.sink.kinds().last(), Some(&EventKind::ApprovalDecision));
        assert!(f
            .registry
            .audit()
            .records(Some("i-1"))
            .iter()
            .any(|r| r.action == AuditAction::ApprovalReceived));
    }

    #[tokio::test]
    async fn test_second_submission_is_already_decided() {
        let f = fixture();
        let request_id = open_request(&f.registry, Duration::from_secs(60)).await;
        let approve = decision(&request_id, Decision::Approve, SECRET);

        f.coordinator.submit_decision(&approve).await.unwrap();
        let before = f.registry.incident("i-1").unwrap();

        let err = f.coordinator.submit_decision(&approve).await.unwrap_err();
        assert_eq!(err, DecisionError::RequestAlreadyDecided(request_id));
        assert_eq!(f.registry.incident("i-1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_check_order() {
        let f = fixture();
        assert_eq!(
            f.coordinator
                .submit_decision(&decision("missing", Decision::Approve, SECRET))
                .await
                .unwrap_err(),
            DecisionError::UnknownRequest("missing".into())
        );

        let request_id = open_request(&f.registry, Duration::from_secs(60)).await;
        assert_eq!(
            f.coordinator
                .submit_decision(&decision(&request_id, Decision::Approve, "wrong"))
                .await
                .unwrap_err(),
            DecisionError::InvalidSignature
        );
        // a rejected signature leaves the request open
        assert_eq!(f.registry.incident("i-1").unwrap().status, IncidentStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_beats_bad_signature() {
        let f = fixture();
        let request_id = open_request(&f.registry, Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.registry.sweep_expired(Utc::now()).await;

        for secret in [SECRET, "wrong"] {
            let err = f
                .coordinator
                .submit_decision(&decision(&request_id, Decision::Approve, secret))
                .await
                .unwrap_err();
            assert_eq!(err, DecisionError::RequestExpired(request_id.clone()));
        }
        assert_eq!(f.registry.incident("i-1").unwrap().status, IncidentStatus::Expired);
    }

    #[tokio::test]
    async fn test_concurrent_decisions_exactly_one_wins() {
        let f = fixture();
        let request_id = open_request(&f.registry, Duration::from_secs(60)).await;

        let approve = decision(&request_id, Decision::Approve, SECRET);
        let reject = decision(&request_id, Decision::Reject, SECRET);
        let (a, b) = tokio::join!(
            {
                let c = f.coordinator.clone();
                tokio::spawn(async move { c.submit_decision(&approve).await })
            },
            {
                let c = f.coordinator.clone();
                tokio::spawn(async move { c.submit_decision(&reject).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DecisionError::RequestAlreadyDecided(_)))));
    }

    #[tokio::test]
    async fn test_rotated_secret() {
        let f = fixture();
        let request_id = open_request(&f.registry, Duration::from_secs(60)).await;
        f.coordinator.rotate_secret("next");

        assert_eq!(
            f.coordinator
                .submit_decision(&decision(&request_id, Decision::Reject, SECRET))
                .await
                .unwrap_err(),
            DecisionError::InvalidSignature
        );
        assert!(f
            .coordinator
            .submit_decision(&decision(&request_id, Decision::Reject, "next"))
            .await
            .is_ok());
    }
}
