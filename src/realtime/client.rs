//! Observer client with capped reconnect.
//!
//! # Connection Loop
//! ```text
//! connect → authenticate/subscribe → stream events
//!     closed or failed → attempt += 1
//!     attempt > max_attempts → Disconnected (terminal, stop)
//!     else sleep(min(max, base * 2^(attempt-1))) and reconnect
//! after any reconnect → Resync (no replay; refetch current state)
//! ```

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::RealtimeConfig;
use crate::realtime::events::{Channel, RelayEvent};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("event consumer went away")]
    ConsumerGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl From<&RealtimeConfig> for ReconnectPolicy {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            base: Duration::from_millis(config.reconnect_base_ms),
            max: Duration::from_millis(config.reconnect_max_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

/// What the observer surfaces to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Connected,
    /// Reconnected after a drop; events in between are lost.
    Resync,
    Event(RelayEvent),
    /// Control replies such as `authenticated` or `pong`.
    Control(Value),
    /// Terminal: retries exhausted, the client has stopped.
    Disconnected { attempts: u32 },
}

pub struct ObserverClient {
    url: String,
    token: Option<String>,
    channels: Vec<Channel>,
    policy: ReconnectPolicy,
}

impl ObserverClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            channels: Vec::new(),
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run in the background; the receiver ends after `Disconnected`.
    pub fn spawn(self) -> mpsc::Receiver<ObserverEvent> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(self.run(tx));
        rx
    }

    pub async fn run(self, tx: mpsc::Sender<ObserverEvent>) {
        let mut attempts = 0u32;
        let mut connected_before = false;

        loop {
            match self.session(&tx, connected_before).await {
                Ok(()) => {
                    connected_before = true;
                    attempts = 0;
                    tracing::info!(url = %self.url, "Observer connection closed by server");
                }
                Err(ClientError::ConsumerGone) => return,
                Err(e) => tracing::warn!(url = %self.url, attempt = attempts, error = %e, "Observer connection failed"),
            }

            attempts += 1;
            if attempts > self.policy.max_attempts {
                tracing::error!(url = %self.url, attempts = attempts - 1, "Observer giving up");
                let _ = tx.send(ObserverEvent::Disconnected { attempts: attempts - 1 }).await;
                return;
            }
            let delay = self.policy.delay(attempts);
            tracing::debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Observer reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection. Returns `Ok` when the server closes an established
    /// connection.
    async fn session(&self, tx: &mpsc::Sender<ObserverEvent>, reconnect: bool) -> Result<(), ClientError> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();

        let hello = match &self.token {
            Some(token) => json!({"type": "authenticate", "token": token}),
            None => json!({"type": "subscribe", "channels": self.channels}),
        };
        sink.send(Message::text(hello.to_string())).await?;
        if self.token.is_some() && !self.channels.is_empty() {
            let narrow = json!({"type": "subscribe", "channels": self.channels});
            sink.send(Message::text(narrow.to_string())).await?;
        }

        emit(tx, ObserverEvent::Connected).await?;
        if reconnect {
            emit(tx, ObserverEvent::Resync).await?;
        }

        while let Some(frame) = stream.next().await {
            match frame? {
                Message::Text(text) => {
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let event = match serde_json::from_value::<RelayEvent>(value.clone()) {
                        Ok(event) => ObserverEvent::Event(event),
                        Err(_) => ObserverEvent::Control(value),
                    };
                    emit(tx, event).await?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}

async fn emit(tx: &mpsc::Sender<ObserverEvent>, event: ObserverEvent) -> Result<(), ClientError> {
    tx.send(event).await.map_err(|_| ClientError::ConsumerGone)
}
