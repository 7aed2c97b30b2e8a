//! Authoritative owner of incident and approval request state.
//!
//! Every write that touches an incident runs under that incident's lock, so a
//! decision and an expiration can never both apply to the same incident.
//! Reads go straight to the store and may run concurrently.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::approval::audit::{AuditAction, AuditLog};
use crate::approval::types::Decision;
use crate::config::ApprovalConfig;
use crate::incidents::store::IncidentStore;
use crate::incidents::types::{
    ApprovalRequest, Incident, IncidentStatus, IncidentSubmission, Priority, RequestState,
};
use crate::observability::metrics;
use crate::realtime::events::{EventKind, EventSink, RelayEvent};
use crate::reporting::FailurePayload;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown incident {0}")]
    UnknownIncident(String),

    #[error("unknown approval request {0}")]
    UnknownRequest(String),

    #[error("incident {0} already exists")]
    DuplicateIncident(String),

    #[error("incident {incident_id} already has undecided request {request_id}")]
    DuplicateRequest { incident_id: String, request_id: String },

    #[error("incident {incident_id} is {status}")]
    IncidentClosed { incident_id: String, status: IncidentStatus },

    #[error("ttl must be positive and representable")]
    InvalidTtl,

    /// Concurrent-mutation conflict on one incident. Safe to retry.
    #[error("state conflict: {0}")]
    StateConflict(String),
}

/// TTL applied when a request does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub default: Duration,
    pub critical: Duration,
}

impl TtlPolicy {
    pub fn ttl_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Critical => self.critical,
            _ => self.default,
        }
    }
}

impl From<&ApprovalConfig> for TtlPolicy {
    fn from(config: &ApprovalConfig) -> Self {
        Self {
            default: Duration::from_secs(config.default_ttl_secs),
            critical: Duration::from_secs(config.critical_ttl_secs),
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&ApprovalConfig::default())
    }
}

/// Proof that the caller holds one incident's write lock.
pub struct IncidentGuard {
    incident_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl IncidentGuard {
    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }
}

/// Result of an applied decision.
#[derive(Debug, Clone)]
pub struct AppliedDecision {
    pub incident: Incident,
    pub request: ApprovalRequest,
}

pub struct IncidentRegistry {
    store: Arc<dyn IncidentStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    events: Arc<dyn EventSink>,
    audit: AuditLog,
    ttl: ArcSwap<TtlPolicy>,
}

impl IncidentRegistry {
    pub fn new(store: Arc<dyn IncidentStore>, events: Arc<dyn EventSink>, audit: AuditLog) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            events,
            audit,
            ttl: ArcSwap::from_pointee(TtlPolicy::default()),
        }
    }

    pub fn with_ttl_policy(self, policy: TtlPolicy) -> Self {
        self.ttl.store(Arc::new(policy));
        self
    }

    pub fn set_ttl_policy(&self, policy: TtlPolicy) {
        self.ttl.store(Arc::new(policy));
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        **self.ttl.load()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Serialize writes for one incident id. The lock exists even for ids
    /// that are not stored yet.
    pub async fn lock_incident(&self, incident_id: &str) -> IncidentGuard {
        let lock = self
            .locks
            .entry(incident_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        IncidentGuard {
            incident_id: incident_id.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    // ----- reads -----

    pub fn incident(&self, id: &str) -> Option<Incident> {
        self.store.get_incident(id)
    }

    pub fn request(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.store.get_request(request_id)
    }

    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.store.list_requests()
    }

    /// Newest first. Does not sweep; see [`Self::list_incidents_swept`].
    pub fn incidents(&self) -> Vec<Incident> {
        let mut incidents = self.store.list_incidents();
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        incidents
    }

    /// Newest first, after expiring overdue requests.
    pub async fn list_incidents_swept(&self) -> Vec<Incident> {
        self.sweep_expired(Utc::now()).await;
        self.incidents()
    }

    // ----- writes -----

    pub async fn create_incident(&self, payload: &FailurePayload) -> Result<Incident, RegistryError> {
        self.create_incident_from(IncidentSubmission::from(payload)).await
    }

    /// Always creates the incident `pending` and emits `new_incident`.
    pub async fn create_incident_from(&self, submission: IncidentSubmission) -> Result<Incident, RegistryError> {
        let incident = submission.into_incident(Utc::now());
        let _guard = self.lock_incident(&incident.id).await;
        if self.store.get_incident(&incident.id).is_some() {
            return Err(RegistryError::DuplicateIncident(incident.id));
        }

        self.store.put_incident(incident.clone());
        self.audit.append(
            AuditAction::IncidentCreated,
            &incident.id,
            None,
            &incident.source,
            json!({"title": incident.title, "trace_id": incident.trace_id}),
        );
        metrics::record_incident(&incident.source);
        tracing::info!(
            incident_id = %incident.id,
            title = %incident.title,
            source = %incident.source,
            trace_id = incident.trace_id.as_deref().unwrap_or("-"),
            "Incident created"
        );
        self.events.publish(RelayEvent::new(EventKind::NewIncident, &incident));
        Ok(incident)
    }

    /// Open a request. At most one undecided request exists per incident; an
    /// overdue one is expired first, which closes the incident.
    pub async fn create_approval_request(
        &self,
        incident_id: &str,
        priority: Priority,
        ttl: Option<Duration>,
        requested_by: &str,
    ) -> Result<ApprovalRequest, RegistryError> {
        let ttl = ttl.unwrap_or_else(|| self.ttl_policy().ttl_for(priority));
        if ttl.is_zero() {
            return Err(RegistryError::InvalidTtl);
        }
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| RegistryError::InvalidTtl)?;

        let guard = self.lock_incident(incident_id).await;
        let now = Utc::now();

        if let Some(open) = self.store.open_request_for(incident_id) {
            if open.is_past_deadline(now) {
                self.expire_locked(&guard, &open.request_id, now);
            } else {
                return Err(RegistryError::DuplicateRequest {
                    incident_id: incident_id.to_string(),
                    request_id: open.request_id,
                });
            }
        }

        let incident = self
            .store
            .get_incident(incident_id)
            .ok_or_else(|| RegistryError::UnknownIncident(incident_id.to_string()))?;
        if !incident.status.is_open() {
            return Err(RegistryError::IncidentClosed {
                incident_id: incident_id.to_string(),
                status: incident.status,
            });
        }

        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(RegistryError::InvalidTtl)?;
        let request = ApprovalRequest {
            request_id: format!("approval-{}", Uuid::new_v4()),
            incident_id: incident_id.to_string(),
            priority,
            state: RequestState::Pending,
            created_at: now,
            expires_at,
            decided_at: None,
        };
        self.store.put_request(request.clone());

        self.audit.append(
            AuditAction::ApprovalRequested,
            incident_id,
            Some(&request.request_id),
            requested_by,
            json!({"priority": priority, "expires_at": request.expires_at}),
        );
        tracing::info!(
            incident_id = %incident_id,
            request_id = %request.request_id,
            priority = ?priority,
            expires_at = %request.expires_at,
            "Approval request created"
        );
        self.events.publish(RelayEvent::new(
            EventKind::NewApprovalRequest,
            json!({"request": &request, "incident": &incident}),
        ));
        Ok(request)
    }

    /// `pending → investigating`. Idempotent for an incident already under
    /// investigation.
    pub async fn start_investigation(&self, incident_id: &str, actor: &str) -> Result<Incident, RegistryError> {
        let _guard = self.lock_incident(incident_id).await;
        let mut incident = self
            .store
            .get_incident(incident_id)
            .ok_or_else(|| RegistryError::UnknownIncident(incident_id.to_string()))?;

        match incident.status {
            IncidentStatus::Investigating => return Ok(incident),
            IncidentStatus::Pending => {}
            status => {
                return Err(RegistryError::IncidentClosed {
                    incident_id: incident_id.to_string(),
                    status,
                })
            }
        }

        incident.status = IncidentStatus::Investigating;
        incident.updated_at = Utc::now();
        self.store.put_incident(incident.clone());
        self.audit.append(AuditAction::InvestigationStarted, incident_id, None, actor, json!({}));
        tracing::info!(incident_id = %incident_id, actor = %actor, "Investigation started");
        self.events.publish(RelayEvent::new(EventKind::IncidentUpdate, &incident));
        Ok(incident)
    }

    /// Apply an already validated decision. The caller must hold the
    /// incident's lock and have re-read the request under it.
    pub fn apply_decision(
        &self,
        guard: &IncidentGuard,
        request_id: &str,
        decision: Decision,
        decided_by: &str,
        signature: &str,
        at: DateTime<Utc>,
    ) -> Result<AppliedDecision, RegistryError> {
        let mut request = self
            .store
            .get_request(request_id)
            .ok_or_else(|| RegistryError::UnknownRequest(request_id.to_string()))?;
        if request.incident_id != guard.incident_id {
            return Err(RegistryError::StateConflict(format!(
                "lock held for {} but request {} belongs to {}",
                guard.incident_id, request_id, request.incident_id
            )));
        }
        if !request.state.is_undecided() {
            return Err(RegistryError::StateConflict(format!(
                "request {request_id} is already {:?}",
                request.state
            )));
        }

        let mut incident = self
            .store
            .get_incident(&request.incident_id)
            .ok_or_else(|| RegistryError::UnknownIncident(request.incident_id.clone()))?;
        if !incident.status.is_open() {
            return Err(RegistryError::IncidentClosed {
                incident_id: incident.id,
                status: incident.status,
            });
        }

        request.state = decision.request_state();
        request.decided_at = Some(at);
        incident.status = decision.incident_status();
        incident.updated_at = at;
        incident.decided_by = Some(decided_by.to_string());
        incident.decision_signature = Some(signature.to_string());

        self.store.put_incident(incident.clone());
        self.store.put_request(request.clone());
        Ok(AppliedDecision { incident, request })
    }

    /// Expire every undecided request with `expires_at <= now`. Returns the
    /// ids of requests this call expired.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let overdue: Vec<ApprovalRequest> = self
            .store
            .list_requests()
            .into_iter()
            .filter(|r| r.state.is_undecided() && r.expires_at <= now)
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for request in overdue {
            let guard = self.lock_incident(&request.incident_id).await;
            if self.expire_locked(&guard, &request.request_id, now) {
                expired.push(request.request_id);
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired overdue approval requests");
        }
        expired
    }

    /// Re-checks under the lock; a decision that won the race leaves the
    /// request alone.
    fn expire_locked(&self, guard: &IncidentGuard, request_id: &str, now: DateTime<Utc>) -> bool {
        let Some(mut request) = self.store.get_request(request_id) else {
            return false;
        };
        if request.incident_id != guard.incident_id
            || !request.state.is_undecided()
            || request.expires_at > now
        {
            return false;
        }

        request.state = RequestState::Expired;
        self.store.put_request(request.clone());

        if let Some(mut incident) = self.store.get_incident(&request.incident_id) {
            if incident.status.is_open() {
                incident.status = IncidentStatus::Expired;
                incident.updated_at = now;
                self.store.put_incident(incident.clone());
                self.events.publish(RelayEvent::new(EventKind::IncidentUpdate, &incident));
            }
        }

        self.audit.append(
            AuditAction::ApprovalExpired,
            &request.incident_id,
            Some(request_id),
            "system",
            json!({"expires_at": request.expires_at}),
        );
        metrics::record_expiration();
        tracing::warn!(
            incident_id = %request.incident_id,
            request_id = %request_id,
            "Approval request expired without a decision"
        );
        true
    }

    /// Drop terminal incidents last updated before `now - retention`, with
    /// their decided requests.
    pub async fn archive_terminal(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };

        let candidates: Vec<String> = self
            .store
            .list_incidents()
            .into_iter()
            .filter(|i| i.status.is_terminal() && i.updated_at < cutoff)
            .map(|i| i.id)
            .collect();

        let mut archived = 0;
        for id in candidates {
            let guard = self.lock_incident(&id).await;
            let still_eligible = self
                .store
                .get_incident(&id)
                .is_some_and(|i| i.status.is_terminal() && i.updated_at < cutoff);
            if !still_eligible {
                continue;
            }
            for request in self.store.list_requests() {
                if request.incident_id == id && !request.state.is_undecided() {
                    self.store.remove_request(&request.request_id);
                }
            }
            self.store.remove_incident(&id);
            drop(guard);
            self.locks.remove(&id);
            archived += 1;
        }
        if archived > 0 {
            tracing::info!(count = archived, "Archived terminal incidents");
        }
        archived
    }
}
