//! Signed delivery against a live capture endpoint.

use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use incident_relay::config::{ReporterConfig, TransportConfig};
use incident_relay::reporting::{Attachment, IncidentReporter, TestError, TestExecutionResult, TestStatus};
use incident_relay::transport::{
    AttemptError, DeliveryError, RetryPolicy, WebhookSender, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

mod common;

fn independent_hmac(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1000),
        max_delay: Duration::from_millis(30_000),
        timeout: Duration::from_secs(5),
    }
}

/// Sender whose sleeps are recorded and skipped.
fn recording_sender() -> (WebhookSender, Arc<Mutex<Vec<Duration>>>) {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let recorded = delays.clone();
    let sender = WebhookSender::new("relay-test").with_sleeper(move |d| {
        recorded.lock().unwrap().push(d);
        async {}
    });
    (sender, delays)
}

#[tokio::test]
async fn test_signature_header_matches_independent_hmac() {
    let endpoint = common::start_capture_endpoint(|_| 200).await;
    let payload = json!({
        "testTitle": "checkout",
        "status": "failed",
        "traceID": "a".repeat(32),
        "retries": 0,
    });

    let receipt = WebhookSender::default()
        .send(&payload, &endpoint.url(), Some("s3cret"), &fast_policy(0))
        .await
        .unwrap();
    assert_eq!(receipt.attempts, 1);
    assert!(receipt.signed);

    let captured = endpoint.requests();
    assert_eq!(captured.len(), 1);
    let body = &captured[0].body;
    assert_eq!(body.as_ref(), serde_json::to_vec(&payload).unwrap().as_slice());

    let header = captured[0].headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
    assert_eq!(header, format!("sha256={}", independent_hmac("s3cret", body)));
    assert_eq!(captured[0].headers.get("content-type").unwrap(), "application/json");
    assert_eq!(
        captured[0].headers.get("content-length").unwrap().to_str().unwrap(),
        body.len().to_string()
    );
    let agent = captured[0].headers.get("user-agent").unwrap().to_str().unwrap();
    assert!(agent.starts_with("incident-relay/"), "user agent was {agent}");

    let stamp: i64 = captured[0].headers.get(TIMESTAMP_HEADER).unwrap().to_str().unwrap().parse().unwrap();
    let skew = (chrono::Utc::now().timestamp_millis() - stamp).abs();
    assert!(skew < 5_000, "timestamp {stamp} is {skew}ms from now");
}

#[tokio::test]
async fn test_unsigned_when_no_secret() {
    let endpoint = common::start_capture_endpoint(|_| 200).await;
    let receipt = WebhookSender::default()
        .send(&json!({"testTitle": "t"}), &endpoint.url(), None, &fast_policy(0))
        .await
        .unwrap();

    assert!(!receipt.signed);
    assert!(endpoint.requests()[0].headers.get(SIGNATURE_HEADER).is_none());
}

#[tokio::test]
async fn test_exact_attempt_count_and_capped_delays() {
    let endpoint = common::start_capture_endpoint(|_| 500).await;
    let (sender, delays) = recording_sender();

    let err = sender
        .send(&json!({"testTitle": "t"}), &endpoint.url(), Some("k"), &fast_policy(6))
        .await
        .unwrap_err();

    match err {
        DeliveryError::Exhausted { attempts, .. } => assert_eq!(attempts, 7),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(endpoint.requests().len(), 7);

    let delays = delays.lock().unwrap().clone();
    assert_eq!(delays.len(), 6);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "delays decreased: {delays:?}");
    assert!(delays.iter().all(|d| *d <= Duration::from_millis(30_000)));
    assert_eq!(*delays.last().unwrap(), Duration::from_millis(30_000));
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let endpoint = common::start_capture_endpoint(|n| if n < 2 { 503 } else { 200 }).await;
    let (sender, delays) = recording_sender();

    let receipt = sender
        .send(&json!({"testTitle": "t"}), &endpoint.url(), Some("k"), &fast_policy(3))
        .await
        .unwrap();

    assert_eq!(receipt.attempts, 3);
    assert_eq!(receipt.status, 200);
    assert_eq!(delays.lock().unwrap().len(), 2);

    // every attempt carries the same signed body
    let captured = endpoint.requests();
    assert!(captured.windows(2).all(|w| w[0].body == w[1].body));
}

#[tokio::test]
async fn test_slow_endpoint_exhausts_with_timeout() {
    let endpoint = common::start_delayed_endpoint(Duration::from_secs(2), |_| 200).await;
    let (sender, delays) = recording_sender();
    let policy = RetryPolicy {
        timeout: Duration::from_millis(100),
        ..fast_policy(1)
    };

    let err = sender
        .send(&json!({"testTitle": "t"}), &endpoint.url(), Some("k"), &policy)
        .await
        .unwrap_err();

    match err {
        DeliveryError::Exhausted {
            attempts,
            last: AttemptError::Timeout(after),
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(after, Duration::from_millis(100));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(delays.lock().unwrap().len(), 1);
    assert_eq!(endpoint.requests().len(), 2);
}

#[tokio::test]
async fn test_each_attempt_is_stamped_separately() {
    let endpoint = common::start_capture_endpoint(|n| if n < 2 { 500 } else { 200 }).await;
    // real pauses so consecutive attempts land on different milliseconds
    let sender = WebhookSender::default().with_sleeper(|_| tokio::time::sleep(Duration::from_millis(20)));

    sender
        .send(&json!({"testTitle": "t"}), &endpoint.url(), Some("k"), &fast_policy(2))
        .await
        .unwrap();

    let stamps: Vec<i64> = endpoint
        .requests()
        .iter()
        .map(|r| r.headers.get(TIMESTAMP_HEADER).unwrap().to_str().unwrap().parse().unwrap())
        .collect();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "stamps not increasing: {stamps:?}");
}

#[tokio::test]
async fn test_reporter_delivers_failure_with_artifact_urls() {
    let endpoint = common::start_capture_endpoint(|_| 200).await;
    let reporter = IncidentReporter::new(
        &ReporterConfig {
            base_artifact_url: "https://artifacts.example.com/".to_string(),
        },
        &TransportConfig {
            endpoint: endpoint.url(),
            secret: "s3cret".to_string(),
            max_retries: 0,
            ..TransportConfig::default()
        },
    );

    let result = TestExecutionResult::new(
        "checkout trace_id: 0af7651916cd43dd8448eb211c80319c",
        TestStatus::Failed,
    )
    .with_error(TestError {
        message: "expected 200, got 500".to_string(),
        ..TestError::default()
    })
    .with_attachment(Attachment::new("video", "video/webm").with_path("/tmp/run-1/video.webm"));

    let receipt = reporter.report(&result).await.unwrap();
    assert!(receipt.signed);

    let captured = endpoint.requests();
    let body: serde_json::Value = serde_json::from_slice(&captured[0].body).unwrap();
    assert_eq!(body["traceID"], "0af7651916cd43dd8448eb211c80319c");
    assert_eq!(body["videoUrl"], "https://artifacts.example.com/videos/video.webm");
    assert!(body.get("traceUrl").is_none());
    let header = captured[0].headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
    assert_eq!(header, format!("sha256={}", independent_hmac("s3cret", &captured[0].body)));
}

#[tokio::test]
async fn test_reporter_swallows_delivery_failure() {
    let endpoint = common::start_capture_endpoint(|_| 500).await;
    let reporter = IncidentReporter::new(
        &ReporterConfig::default(),
        &TransportConfig {
            endpoint: endpoint.url(),
            max_retries: 0,
            ..TransportConfig::default()
        },
    );

    let result = TestExecutionResult::new("flaky", TestStatus::TimedOut);
    assert!(reporter.report(&result).await.is_none());
    assert_eq!(endpoint.requests().len(), 1);
}

#[tokio::test]
async fn test_background_report_resolves_to_receipt() {
    let endpoint = common::start_capture_endpoint(|_| 200).await;
    let reporter = IncidentReporter::new(
        &ReporterConfig::default(),
        &TransportConfig {
            endpoint: endpoint.url(),
            max_retries: 0,
            ..TransportConfig::default()
        },
    );

    let failed = reporter.report_in_background(TestExecutionResult::new("checkout", TestStatus::Failed));
    let passed = reporter.report_in_background(TestExecutionResult::new("login", TestStatus::Passed));

    let receipt = failed.await.unwrap().unwrap();
    assert_eq!(receipt.attempts, 1);
    assert!(!receipt.signed);
    assert!(passed.await.unwrap().is_none());

    let captured = endpoint.requests();
    assert_eq!(captured.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&captured[0].body).unwrap();
    assert_eq!(body["testTitle"], "checkout");
}
