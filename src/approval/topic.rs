//! Remediation topic.
//!
//! Accepted decisions are published here; the remediation collaborator
//! subscribes instead of registering a callback. Lagging subscribers lose
//! the oldest messages.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::approval::types::RemediationMessage;
use crate::config::RemediationConfig;
use crate::transport::{RetryPolicy, WebhookSender};

#[derive(Clone)]
pub struct DecisionTopic {
    tx: broadcast::Sender<Arc<RemediationMessage>>,
}

impl DecisionTopic {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of subscribers that received the message.
    pub fn publish(&self, message: RemediationMessage) -> usize {
        self.tx.send(Arc::new(message)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RemediationMessage>> {
        self.tx.subscribe()
    }
}

impl Default for DecisionTopic {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Topic subscriber that forwards decisions to the remediation endpoint.
pub struct RemediationForwarder {
    endpoint: String,
    secret: String,
    policy: RetryPolicy,
    sender: WebhookSender,
}

impl RemediationForwarder {
    /// `None` when no endpoint is configured.
    pub fn new(config: &RemediationConfig, policy: RetryPolicy, sender: WebhookSender) -> Option<Self> {
        if config.endpoint.is_empty() {
            return None;
        }
        Some(Self {
            endpoint: config.endpoint.clone(),
            secret: config.secret.clone(),
            policy,
            sender,
        })
    }

    pub async fn run(
        self,
        mut messages: broadcast::Receiver<Arc<RemediationMessage>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(endpoint = %self.endpoint, "Remediation forwarder starting");
        loop {
            tokio::select! {
                received = messages.recv() => match received {
                    Ok(message) => self.forward(&message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Remediation forwarder lagged, decisions dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Remediation forwarder received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn forward(&self, message: &RemediationMessage) {
        let secret = (!self.secret.is_empty()).then_some(self.secret.as_str());
        match self.sender.send(message, &self.endpoint, secret, &self.policy).await {
            Ok(receipt) => tracing::info!(
                request_id = %message.request_id,
                incident_id = %message.incident_id,
                attempts = receipt.attempts,
                "Decision forwarded to remediation"
            ),
            Err(e) => tracing::warn!(
                request_id = %message.request_id,
                incident_id = %message.incident_id,
                error = %e,
                "Decision not forwarded to remediation"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::types::Decision;
    use crate::incidents::ProposedAction;
    use chrono::Utc;

    fn message() -> RemediationMessage {
        RemediationMessage {
            request_id: "r-1".into(),
            incident_id: "i-1".into(),
            decision: Decision::Approve,
            decided_by: "1".into(),
            user_name: "Admin".into(),
            reason: None,
            proposed_action: ProposedAction::derive("pod crash", None, "cart"),
            decided_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let topic = DecisionTopic::default();
        assert_eq!(topic.publish(message()), 0);

        let mut rx = topic.subscribe();
        assert_eq!(topic.publish(message()), 1);
        assert_eq!(rx.recv().await.unwrap().request_id, "r-1");
    }

    #[test]
    fn test_forwarder_disabled_without_endpoint() {
        assert!(RemediationForwarder::new(
            &RemediationConfig::default(),
            RetryPolicy::default(),
            WebhookSender::default()
        )
        .is_none());
    }
}
