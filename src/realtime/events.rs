//! Events published by the registry and coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Event kinds pushed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewIncident,
    IncidentUpdate,
    NewApprovalRequest,
    ApprovalDecision,
}

impl EventKind {
    /// Subscription channel carrying this kind.
    pub fn channel(self) -> Channel {
        match self {
            EventKind::NewIncident | EventKind::IncidentUpdate => Channel::Incidents,
            EventKind::NewApprovalRequest | EventKind::ApprovalDecision => Channel::Approvals,
        }
    }
}

/// Observer subscription channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Incidents,
    Approvals,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Incidents, Channel::Approvals];
}

/// `{type, payload, timestamp}` as sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl RelayEvent {
    pub fn new(kind: EventKind, payload: impl Serialize) -> Self {
        Self {
            kind,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of registry state changes. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: RelayEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: RelayEvent) {}
}

/// Sink that keeps every event, for tests and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<RelayEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: RelayEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = RelayEvent::new(EventKind::IncidentUpdate, serde_json::json!({"id": "i-1"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "incident_update");
        assert_eq!(value["payload"]["id"], "i-1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_kind_channels() {
        assert_eq!(EventKind::NewIncident.channel(), Channel::Incidents);
        assert_eq!(EventKind::ApprovalDecision.channel(), Channel::Approvals);
    }
}
