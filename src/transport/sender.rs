//! Signed webhook delivery with bounded retries.
//!
//! # Attempt Loop
//! ```text
//! body = canonical JSON, signature = sha256=HMAC(secret, body)
//! for attempt in 0..=max_retries:
//!     sleep(backoff(attempt))            attempt 0 is immediate
//!     POST with per-attempt timeout
//!     2xx            → Delivered
//!     non-2xx/error  → remember, continue
//! → Exhausted { attempts, last }
//! ```

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::TransportConfig;
use crate::observability::metrics;
use crate::transport::backoff::calculate_backoff;
use crate::transport::signature::{sign_body, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivery failure after all attempts.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    Header(String),

    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: AttemptError },
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub attempts: u32,
    pub status: u16,
    pub signed: bool,
}

/// Retry and timeout policy for one send.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Sleeper = Arc<dyn Fn(Duration) -> SleepFuture + Send + Sync>;

/// HTTP client that signs and delivers JSON payloads.
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    user_agent: String,
    sleeper: Sleeper,
}

impl WebhookSender {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: user_agent.into(),
            sleeper: Arc::new(|d: Duration| -> SleepFuture { Box::pin(tokio::time::sleep(d)) }),
        }
    }

    /// Replace the inter-attempt sleep, e.g. to record delays in tests.
    pub fn with_sleeper<F, Fut>(mut self, sleeper: F) -> Self
    where
        F: Fn(Duration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.sleeper = Arc::new(move |d: Duration| -> SleepFuture { Box::pin(sleeper(d)) });
        self
    }

    /// Deliver `payload` to `url`, signing with `secret` when it is non-empty.
    ///
    /// Makes at most `policy.max_retries + 1` attempts.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        url: &str,
        secret: Option<&str>,
        policy: &RetryPolicy,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let body = serde_json::to_vec(payload)?;
        let signature = secret.and_then(|s| sign_body(s, &body));
        let headers = self.build_headers(body.len(), signature.as_deref())?;

        let mut last = AttemptError::Transport("no attempt made".to_string());
        for attempt in 0..=policy.max_retries {
            if attempt > 0 {
                let delay = calculate_backoff(
                    attempt,
                    policy.base_delay.as_millis() as u64,
                    policy.max_delay.as_millis() as u64,
                );
                tracing::debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                (self.sleeper)(delay).await;
            }

            match self.attempt(url, &headers, &body, policy.timeout).await {
                Ok(status) => {
                    metrics::record_delivery("delivered");
                    tracing::info!(url = %url, attempt, status, signed = signature.is_some(), "Payload delivered");
                    return Ok(DeliveryReceipt {
                        attempts: attempt + 1,
                        status,
                        signed: signature.is_some(),
                    });
                }
                Err(e) => {
                    tracing::warn!(url = %url, attempt, error = %e, "Delivery attempt failed");
                    last = e;
                }
            }
        }

        metrics::record_delivery("exhausted");
        Err(DeliveryError::Exhausted {
            attempts: policy.max_retries + 1,
            last,
        })
    }

    fn build_headers(&self, len: usize, signature: Option<&str>) -> Result<HeaderMap, DeliveryError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent).map_err(|e| DeliveryError::Header(e.to_string()))?,
        );
        if let Some(signature) = signature {
            headers.insert(
                SIGNATURE_HEADER,
                HeaderValue::from_str(signature).map_err(|e| DeliveryError::Header(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &[u8],
        timeout: Duration,
    ) -> Result<u16, AttemptError> {
        let mut headers = headers.clone();
        // stamped per attempt so retries carry their own send time
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from(Utc::now().timestamp_millis()));
        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body.to_vec())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptError::Timeout(timeout)
                } else {
                    AttemptError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(AttemptError::Status(status.as_u16()))
        }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new(concat!("incident-relay/", env!("CARGO_PKG_VERSION")))
    }
}
