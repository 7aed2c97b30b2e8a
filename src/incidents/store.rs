//! Incident storage backends.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::incidents::types::{ApprovalRequest, Incident};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Backing storage for incidents and approval requests.
///
/// Implementations only need per-entry atomicity; the registry serializes
/// all writes that touch one incident.
pub trait IncidentStore: Send + Sync {
    fn get_incident(&self, id: &str) -> Option<Incident>;
    fn put_incident(&self, incident: Incident);
    fn remove_incident(&self, id: &str) -> Option<Incident>;
    fn list_incidents(&self) -> Vec<Incident>;

    fn get_request(&self, request_id: &str) -> Option<ApprovalRequest>;
    fn put_request(&self, request: ApprovalRequest);
    fn remove_request(&self, request_id: &str) -> Option<ApprovalRequest>;
    fn list_requests(&self) -> Vec<ApprovalRequest>;

    /// The undecided request for `incident_id`, if any.
    fn open_request_for(&self, incident_id: &str) -> Option<ApprovalRequest>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    incidents: Vec<Incident>,
    requests: Vec<ApprovalRequest>,
}

/// DashMap-backed store with an open-request index and JSON snapshots.
#[derive(Clone, Default)]
pub struct MemoryStore {
    incidents: Arc<DashMap<String, Incident>>,
    requests: Arc<DashMap<String, ApprovalRequest>>,
    /// incident id → undecided request id
    open: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot; a missing file yields an empty store.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let store = Self::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let snapshot: Snapshot = serde_json::from_reader(reader)?;
            for incident in snapshot.incidents {
                store.put_incident(incident);
            }
            for request in snapshot.requests {
                store.put_request(request);
            }
            tracing::info!(
                path = %path.display(),
                incidents = store.incidents.len(),
                requests = store.requests.len(),
                "Loaded incident snapshot"
            );
        }
        Ok(store)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let snapshot = Snapshot {
            incidents: self.list_incidents(),
            requests: self.list_requests(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush()?;
        tracing::info!(
            path = %path.display(),
            incidents = snapshot.incidents.len(),
            requests = snapshot.requests.len(),
            "Saved incident snapshot"
        );
        Ok(())
    }
}

impl IncidentStore for MemoryStore {
    fn get_incident(&self, id: &str) -> Option<Incident> {
        self.incidents.get(id).map(|r| r.value().clone())
    }

    fn put_incident(&self, incident: Incident) {
        self.incidents.insert(incident.id.clone(), incident);
    }

    fn remove_incident(&self, id: &str) -> Option<Incident> {
        self.incidents.remove(id).map(|(_, v)| v)
    }

    fn list_incidents(&self) -> Vec<Incident> {
        self.incidents.iter().map(|r| r.value().clone()).collect()
    }

    fn get_request(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.requests.get(request_id).map(|r| r.value().clone())
    }

    fn put_request(&self, request: ApprovalRequest) {
        if request.state.is_undecided() {
            self.open.insert(request.incident_id.clone(), request.request_id.clone());
        } else {
            self.open
                .remove_if(&request.incident_id, |_, open_id| *open_id == request.request_id);
        }
        self.requests.insert(request.request_id.clone(), request);
    }

    fn remove_request(&self, request_id: &str) -> Option<ApprovalRequest> {
        let removed = self.requests.remove(request_id).map(|(_, v)| v)?;
        self.open
            .remove_if(&removed.incident_id, |_, open_id| open_id == request_id);
        Some(removed)
    }

    fn list_requests(&self) -> Vec<ApprovalRequest> {
        self.requests.iter().map(|r| r.value().clone()).collect()
    }

    fn open_request_for(&self, incident_id: &str) -> Option<ApprovalRequest> {
        let request_id = self.open.get(incident_id).map(|r| r.value().clone())?;
        self.get_request(&request_id)
    }
}
