//! Background expiry and retention loop.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::ApprovalConfig;
use crate::incidents::registry::IncidentRegistry;

pub struct ExpirySweeper {
    registry: Arc<IncidentRegistry>,
    interval: Duration,
    retention: Duration,
}

impl ExpirySweeper {
    pub fn new(registry: Arc<IncidentRegistry>, config: &ApprovalConfig) -> Self {
        Self {
            registry,
            interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass: expire overdue requests, then archive old terminal incidents.
    pub async fn tick(&self) -> (usize, usize) {
        let now = Utc::now();
        let expired = self.registry.sweep_expired(now).await.len();
        let archived = self.registry.archive_terminal(now, self.retention).await;
        (expired, archived)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            retention_secs = self.retention.as_secs(),
            "Expiry sweeper starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Expiry sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
