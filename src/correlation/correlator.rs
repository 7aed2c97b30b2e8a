//! Trace id resolution for finished test runs.
//!
//! # Strategy Order
//! ```text
//! 1. title / annotations      trace_id: <32hex>
//! 2. network-log attachment   traceparent, x-cloud-trace-context
//! 3. console-log attachment   trace_id / tracing_id / request_id <32hex>
//! 4. json attachments         traceId, trace_id, tracing_id, requestId, request_id
//! 5. synthetic                sha256(file:line:title:now_ms)[..32]
//! ```
//!
//! The first strategy that yields a well-formed id wins. A strategy that
//! cannot read its input counts as a miss, so `resolve` always returns.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::correlation::context::{TraceContext, TraceId, TRACEPARENT};
use crate::reporting::types::{AttachmentKind, TestExecutionResult};

static TITLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)trace[_-]?id[:\s]+([a-f0-9]{32})\b").expect("title pattern is valid")
});

static TRACEPARENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)traceparent["']?\s*[:=]\s*["']?([0-9a-z]+(?:-[0-9a-z]+)*)"#)
        .expect("traceparent pattern is valid")
});

static CLOUD_TRACE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)x-cloud-trace-context["']?\s*[:=]\s*["']?([a-f0-9]{32})/"#)
        .expect("cloud trace pattern is valid")
});

static CONSOLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // prefixed keys such as otel_trace_id or x_request_id count too
    Regex::new(r#"(?i)(?:^|[^a-z0-9])(?:trace_id|tracing_id|request_id)\b["']?\s*[:=]?\s*["']?([a-f0-9]{32})\b"#)
        .expect("console pattern is valid")
});

const JSON_TRACE_FIELDS: [&str; 5] = ["traceId", "trace_id", "tracing_id", "requestId", "request_id"];

/// Which strategy produced a trace id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSource {
    Title,
    Annotation,
    NetworkLog,
    ConsoleLog,
    JsonAttachment,
    Synthetic,
}

/// Resolves a trace id for a completed test run.
#[derive(Debug, Clone, Default)]
pub struct TraceCorrelator;

impl TraceCorrelator {
    pub fn new() -> Self {
        Self
    }

    /// Never fails and always returns a 32-lowercase-hex id.
    pub fn resolve(&self, result: &TestExecutionResult) -> TraceId {
        self.resolve_with_source(result).0
    }

    pub fn resolve_with_source(&self, result: &TestExecutionResult) -> (TraceId, TraceSource) {
        if let Some(found) = self.from_title(result) {
            return found;
        }
        if let Some(id) = self.from_network_logs(result) {
            return (id, TraceSource::NetworkLog);
        }
        if let Some(id) = self.from_console_logs(result) {
            return (id, TraceSource::ConsoleLog);
        }
        if let Some(id) = self.from_json_attachments(result) {
            return (id, TraceSource::JsonAttachment);
        }

        let id = synthetic_trace_id(result, Utc::now().timestamp_millis());
        tracing::debug!(
            title = %result.title,
            trace_id = %id,
            "No trace id found in test output, using synthetic id"
        );
        (id, TraceSource::Synthetic)
    }

    fn from_title(&self, result: &TestExecutionResult) -> Option<(TraceId, TraceSource)> {
        if let Some(id) = match_title(&result.title) {
            return Some((id, TraceSource::Title));
        }
        result
            .annotations
            .iter()
            .filter_map(|a| a.description.as_deref())
            .find_map(match_title)
            .map(|id| (id, TraceSource::Annotation))
    }

    fn from_network_logs(&self, result: &TestExecutionResult) -> Option<TraceId> {
        result.attachments_of(AttachmentKind::NetworkLog).find_map(|attachment| {
            let text = read_or_miss(attachment.read_text(), &attachment.name)?;
            extract_from_network_log(&text)
        })
    }

    fn from_console_logs(&self, result: &TestExecutionResult) -> Option<TraceId> {
        result.attachments_of(AttachmentKind::ConsoleLog).find_map(|attachment| {
            let text = read_or_miss(attachment.read_text(), &attachment.name)?;
            CONSOLE_PATTERN
                .captures_iter(&text)
                .find_map(|caps| TraceId::parse(&caps[1]))
        })
    }

    fn from_json_attachments(&self, result: &TestExecutionResult) -> Option<TraceId> {
        result.attachments_of(AttachmentKind::Json).find_map(|attachment| {
            let text = read_or_miss(attachment.read_text(), &attachment.name)?;
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => find_json_trace_field(&value),
                Err(e) => {
                    tracing::debug!(attachment = %attachment.name, error = %e, "JSON attachment did not parse");
                    None
                }
            }
        })
    }
}

fn read_or_miss(read: std::io::Result<String>, name: &str) -> Option<String> {
    match read {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::debug!(attachment = %name, error = %e, "Attachment unreadable, skipping");
            None
        }
    }
}

fn match_title(text: &str) -> Option<TraceId> {
    TITLE_PATTERN
        .captures_iter(text)
        .find_map(|caps| TraceId::parse(&caps[1]))
}

/// Find a trace id in network log text: HAR-style JSON header lists first,
/// then free-text header dumps.
pub fn extract_from_network_log(text: &str) -> Option<TraceId> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if let Some(id) = find_json_traceparent(&value) {
            return Some(id);
        }
    }

    TRACEPARENT_PATTERN
        .captures_iter(text)
        .find_map(|caps| TraceContext::parse_traceparent(&caps[1]).map(|ctx| ctx.trace_id))
        .or_else(|| {
            CLOUD_TRACE_PATTERN
                .captures_iter(text)
                .find_map(|caps| TraceId::parse(&caps[1]))
        })
}

fn find_json_traceparent(value: &Value) -> Option<TraceId> {
    match value {
        Value::Object(map) => {
            // {"name": "traceparent", "value": "..."} as in HAR header lists
            if let (Some(Value::String(name)), Some(Value::String(v))) = (map.get("name"), map.get("value")) {
                if let Some(id) = header_trace_id(name, v) {
                    return Some(id);
                }
            }
            for (key, v) in map {
                if let Value::String(s) = v {
                    if let Some(id) = header_trace_id(key, s) {
                        return Some(id);
                    }
                }
            }
            map.values().find_map(find_json_traceparent)
        }
        Value::Array(items) => items.iter().find_map(find_json_traceparent),
        _ => None,
    }
}

fn header_trace_id(name: &str, value: &str) -> Option<TraceId> {
    if name.eq_ignore_ascii_case(TRACEPARENT) {
        TraceContext::parse_traceparent(value).map(|ctx| ctx.trace_id)
    } else if name.eq_ignore_ascii_case("x-cloud-trace-context") {
        value.split('/').next().and_then(TraceId::parse)
    } else {
        None
    }
}

fn find_json_trace_field(value: &Value) -> Option<TraceId> {
    match value {
        Value::Object(map) => {
            for field in JSON_TRACE_FIELDS {
                if let Some(Value::String(s)) = map.get(field) {
                    if let Some(id) = TraceId::parse(s) {
                        return Some(id);
                    }
                }
            }
            map.values().find_map(find_json_trace_field)
        }
        Value::Array(items) => items.iter().find_map(find_json_trace_field),
        _ => None,
    }
}

/// Content hash of `{file}:{line}:{title}:{now_ms}`, truncated to 32 hex.
pub fn synthetic_trace_id(result: &TestExecutionResult, now_ms: i64) -> TraceId {
    let seed = format!(
        "{}:{}:{}:{}",
        result.location.file, result.location.line, result.title, now_ms
    );
    TraceId::from_digest(&Sha256::digest(seed.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::types::{Annotation, Attachment, TestStatus};

    const ID: &str = "0af7651916cd43dd8448eb211c80319c";

    fn failed(title: &str) -> TestExecutionResult {
        TestExecutionResult::new(title, TestStatus::Failed)
    }

    #[test]
    fn test_title_pattern() {
        let result = failed(&format!("checkout fails trace_id: {}", ID));
        let (id, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(id.as_str(), ID);
        assert_eq!(source, TraceSource::Title);
    }

    #[test]
    fn test_annotation_pattern() {
        let mut result = failed("checkout");
        result.annotations.push(Annotation {
            kind: "issue".into(),
            description: Some(format!("TraceID {}", ID.to_uppercase())),
        });
        let (id, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(id.as_str(), ID);
        assert_eq!(source, TraceSource::Annotation);
    }

    #[test]
    fn test_title_rejects_overlong_candidate() {
        let result = failed(&format!("trace-id: {}ff", ID));
        let (_, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(source, TraceSource::Synthetic);
    }

    #[test]
    fn test_network_log_traceparent() {
        let log = "GET /api/cart\ntraceparent: 00-deadbeefdeadbeefdeadbeefdeadbeef-aabbccddeeff0011-01\n";
        let result = failed("checkout")
            .with_attachment(Attachment::new("network-log", "text/plain").with_body(log));
        let (id, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(id.as_str(), "deadbeefdeadbeefdeadbeefdeadbeef");
        assert_eq!(source, TraceSource::NetworkLog);
    }

    #[test]
    fn test_network_log_har_headers() {
        let har = serde_json::json!({
            "log": {"entries": [{"request": {"headers": [
                {"name": "accept", "value": "*/*"},
                {"name": "traceparent", "value": format!("00-{}-b7ad6b7169203331-01", ID)}
            ]}}]}
        });
        let result = failed("checkout")
            .with_attachment(Attachment::new("network.har", "application/json").with_body(har.to_string()));
        assert_eq!(TraceCorrelator::new().resolve(&result).as_str(), ID);
    }

    #[test]
    fn test_network_log_cloud_trace_context() {
        let log = format!("x-cloud-trace-context: {}/1234567;o=1", ID);
        let result = failed("checkout")
            .with_attachment(Attachment::new("network-log", "text/plain").with_body(log));
        assert_eq!(TraceCorrelator::new().resolve(&result).as_str(), ID);
    }

    #[test]
    fn test_malformed_traceparent_falls_through_to_console() {
        let result = failed("checkout")
            .with_attachment(
                Attachment::new("network-log", "text/plain")
                    .with_body("traceparent: 00-deadbeef-aabbccddeeff0011-01"),
            )
            .with_attachment(
                Attachment::new("console-log", "text/plain")
                    .with_body(format!("[error] upstream failed request_id={}", ID)),
            );
        let (id, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(id.as_str(), ID);
        assert_eq!(source, TraceSource::ConsoleLog);
    }

    #[test]
    fn test_console_log_prefixed_keys() {
        for line in [
            format!("span closed otel_trace_id={}", ID),
            format!("x_request_id: {} status=500", ID),
        ] {
            let result = failed("checkout")
                .with_attachment(Attachment::new("console-log", "text/plain").with_body(line.clone()));
            let (id, source) = TraceCorrelator::new().resolve_with_source(&result);
            assert_eq!(id.as_str(), ID, "line: {line}");
            assert_eq!(source, TraceSource::ConsoleLog, "line: {line}");
        }
    }

    #[test]
    fn test_console_log_ignores_longer_key_names() {
        let result = failed("checkout").with_attachment(
            Attachment::new("console-log", "text/plain").with_body(format!("parent2trace_id={}", ID)),
        );
        let (_, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(source, TraceSource::Synthetic);
    }

    #[test]
    fn test_json_attachment_fields() {
        let body = serde_json::json!({"response": {"meta": {"requestId": ID}}}).to_string();
        let result = failed("checkout")
            .with_attachment(Attachment::new("api-response", "application/json").with_body(body));
        let (id, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(id.as_str(), ID);
        assert_eq!(source, TraceSource::JsonAttachment);
    }

    #[test]
    fn test_unreadable_attachment_is_a_miss() {
        let result = failed("checkout").with_attachment(
            Attachment::new("console-log", "text/plain").with_path("/nonexistent/relay/console.log"),
        );
        let (id, source) = TraceCorrelator::new().resolve_with_source(&result);
        assert_eq!(source, TraceSource::Synthetic);
        assert_eq!(id.as_str().len(), 32);
    }

    #[test]
    fn test_synthetic_is_deterministic_for_same_inputs() {
        let result = failed("checkout");
        let a = synthetic_trace_id(&result, 1_700_000_000_000);
        let b = synthetic_trace_id(&result, 1_700_000_000_000);
        let c = synthetic_trace_id(&result, 1_700_000_000_001);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }
}
