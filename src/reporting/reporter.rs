//! Builds failure payloads from test results and ships them.

use chrono::Utc;

use crate::config::{ReporterConfig, TransportConfig};
use crate::correlation::{TraceCorrelator, TraceId};
use crate::reporting::types::{AttachmentKind, FailurePayload, TestExecutionResult};
use crate::transport::{DeliveryReceipt, RetryPolicy, WebhookSender};

/// Turns failed test results into signed incident deliveries.
#[derive(Clone)]
pub struct IncidentReporter {
    base_artifact_url: String,
    endpoint: String,
    secret: String,
    policy: RetryPolicy,
    correlator: TraceCorrelator,
    sender: WebhookSender,
}

impl IncidentReporter {
    pub fn new(reporter: &ReporterConfig, transport: &TransportConfig) -> Self {
        Self {
            base_artifact_url: reporter.base_artifact_url.trim_end_matches('/').to_string(),
            endpoint: transport.endpoint.clone(),
            secret: transport.secret.clone(),
            policy: RetryPolicy::from(transport),
            correlator: TraceCorrelator::new(),
            sender: WebhookSender::new(transport.user_agent.clone()),
        }
    }

    pub fn with_sender(mut self, sender: WebhookSender) -> Self {
        self.sender = sender;
        self
    }

    /// Payload for a failed or timed-out result, `None` for any other status.
    pub fn build(&self, result: &TestExecutionResult, trace_id: TraceId) -> Option<FailurePayload> {
        if !result.status.is_failure() {
            return None;
        }

        Some(FailurePayload {
            test_title: result.title.clone(),
            status: result.status,
            error: result.error.clone(),
            retries: result.retry,
            trace_id,
            video_url: self.artifact_url(result, AttachmentKind::Video),
            trace_url: self.artifact_url(result, AttachmentKind::Trace),
            timestamp: Utc::now(),
        })
    }

    /// `{base}/{type}s/{filename}` for the first attachment of `kind` with a path.
    fn artifact_url(&self, result: &TestExecutionResult, kind: AttachmentKind) -> Option<String> {
        let segment = match kind {
            AttachmentKind::Video => "videos",
            AttachmentKind::Trace => "traces",
            _ => return None,
        };
        result
            .attachments_of(kind)
            .find_map(|a| a.file_name())
            .map(|file| format!("{}/{}/{}", self.base_artifact_url, segment, file))
    }

    /// Correlate, build and deliver. Delivery failures are logged and
    /// swallowed; this never fails the calling test.
    pub async fn report(&self, result: &TestExecutionResult) -> Option<DeliveryReceipt> {
        if !result.status.is_failure() {
            return None;
        }

        let (trace_id, source) = self.correlator.resolve_with_source(result);
        tracing::debug!(title = %result.title, trace_id = %trace_id, source = ?source, "Trace id resolved");

        let payload = self.build(result, trace_id)?;
        let secret = (!self.secret.is_empty()).then_some(self.secret.as_str());

        match self.sender.send(&payload, &self.endpoint, secret, &self.policy).await {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                tracing::warn!(
                    title = %payload.test_title,
                    trace_id = %payload.trace_id,
                    error = %e,
                    "Failure report not delivered"
                );
                None
            }
        }
    }

    /// Fire-and-forget variant for test workers: the report runs on its own
    /// task so it never delays the test outcome.
    pub fn report_in_background(&self, result: TestExecutionResult) -> tokio::task::JoinHandle<Option<DeliveryReceipt>> {
        let reporter = self.clone();
        tokio::spawn(async move { reporter.report(&result).await })
    }
}
