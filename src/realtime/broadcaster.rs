//! Fan-out of registry events to observer sessions.
//!
//! Each session owns a bounded queue drained by its own writer task.
//! `publish` only ever calls `try_send`, so a slow or broken session loses
//! events instead of delaying anyone else.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::UserInfo;
use crate::observability::metrics;
use crate::realtime::events::{Channel, EventSink, RelayEvent};

pub type SessionId = Uuid;

struct SessionEntry {
    tx: mpsc::Sender<Arc<str>>,
    /// Set by the first `authenticate` or `subscribe`.
    active: bool,
    user: Option<UserInfo>,
    channels: HashSet<Channel>,
}

pub struct RealtimeBroadcaster {
    sessions: DashMap<SessionId, SessionEntry>,
    buffer: usize,
}

impl RealtimeBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Add an inactive session. The receiver feeds its writer task.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<Arc<str>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.sessions.insert(
            id,
            SessionEntry {
                tx,
                active: false,
                user: None,
                channels: HashSet::new(),
            },
        );
        metrics::set_sessions(self.sessions.len());
        tracing::debug!(session_id = %id, "Observer session registered");
        (id, rx)
    }

    pub fn unregister(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            metrics::set_sessions(self.sessions.len());
            tracing::debug!(session_id = %id, "Observer session removed");
        }
    }

    /// Start delivery on `channels`; empty means all.
    pub fn subscribe(&self, id: &SessionId, channels: &[Channel]) -> Vec<Channel> {
        let wanted: Vec<Channel> = if channels.is_empty() {
            Channel::ALL.to_vec()
        } else {
            channels.to_vec()
        };
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.active = true;
            entry.channels = wanted.iter().copied().collect();
        }
        wanted
    }

    /// Mark the session authenticated and subscribe it to every channel.
    pub fn authenticate(&self, id: &SessionId, user: UserInfo) -> Vec<Channel> {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.user = Some(user);
        }
        self.subscribe(id, &[])
    }

    pub fn user(&self, id: &SessionId) -> Option<UserInfo> {
        self.sessions.get(id).and_then(|e| e.user.clone())
    }

    /// Queue a message for one session regardless of subscriptions.
    pub fn send_to(&self, id: &SessionId, text: impl Into<Arc<str>>) -> bool {
        match self.sessions.get(id) {
            Some(entry) => entry.tx.try_send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Drop every session; writer tasks see their queues close and shut
    /// the sockets.
    pub fn close_all(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        metrics::set_sessions(0);
        if count > 0 {
            tracing::info!(sessions = count, "Closed observer sessions");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.active).count()
    }

    /// Push to every active session subscribed to the event's channel.
    /// Returns how many sessions accepted the event.
    pub fn broadcast(&self, event: &RelayEvent) -> usize {
        let text: Arc<str> = match serde_json::to_string(event) {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                return 0;
            }
        };
        let channel = event.kind.channel();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.sessions.iter() {
            if !entry.active || !entry.channels.contains(&channel) {
                continue;
            }
            match entry.tx.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(session_id = %entry.key(), kind = ?event.kind, "Session queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        for id in closed {
            self.unregister(&id);
        }
        delivered
    }
}

impl EventSink for RealtimeBroadcaster {
    fn publish(&self, event: RelayEvent) {
        let delivered = self.broadcast(&event);
        tracing::debug!(kind = ?event.kind, delivered, "Event broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::events::EventKind;
    use serde_json::json;

    fn event(kind: EventKind) -> RelayEvent {
        RelayEvent::new(kind, json!({"id": "i-1"}))
    }

    #[tokio::test]
    async fn test_inactive_sessions_receive_nothing() {
        let broadcaster = RealtimeBroadcaster::new(8);
        let (_, mut rx) = broadcaster.register();
        assert_eq!(broadcaster.broadcast(&event(EventKind::NewIncident)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_filtering() {
        let broadcaster = RealtimeBroadcaster::new(8);
        let (incidents, mut incidents_rx) = broadcaster.register();
        let (approvals, mut approvals_rx) = broadcaster.register();
        broadcaster.subscribe(&incidents, &[Channel::Incidents]);
        broadcaster.subscribe(&approvals, &[Channel::Approvals]);

        broadcaster.publish(event(EventKind::IncidentUpdate));
        broadcaster.publish(event(EventKind::ApprovalDecision));

        let got: serde_json::Value = serde_json::from_str(&incidents_rx.recv().await.unwrap()).unwrap();
        assert_eq!(got["type"], "incident_update");
        assert!(incidents_rx.try_recv().is_err());

        let got: serde_json::Value = serde_json::from_str(&approvals_rx.recv().await.unwrap()).unwrap();
        assert_eq!(got["type"], "approval_decision");
    }

    #[tokio::test]
    async fn test_full_session_does_not_block_others() {
        let broadcaster = RealtimeBroadcaster::new(1);
        let (slow, _slow_rx) = broadcaster.register();
        let (fast, mut fast_rx) = broadcaster.register();
        broadcaster.subscribe(&slow, &[]);
        broadcaster.subscribe(&fast, &[]);

        assert_eq!(broadcaster.broadcast(&event(EventKind::NewIncident)), 2);
        fast_rx.recv().await.unwrap();
        // slow never drains; it drops the second event, fast still gets it
        assert_eq!(broadcaster.broadcast(&event(EventKind::NewIncident)), 1);
        assert!(fast_rx.recv().await.is_some());
        assert_eq!(broadcaster.session_count(), 2);
    }

    #[tokio::test]
    async fn test_closed_sessions_are_pruned() {
        let broadcaster = RealtimeBroadcaster::new(4);
        let (id, rx) = broadcaster.register();
        broadcaster.subscribe(&id, &[]);
        drop(rx);

        assert_eq!(broadcaster.broadcast(&event(EventKind::NewIncident)), 0);
        assert_eq!(broadcaster.session_count(), 0);
    }
}
