//! Test run and failure payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::correlation::TraceId;

/// Final status of a test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
    Interrupted,
}

impl TestStatus {
    /// Only these statuses produce an incident.
    pub fn is_failure(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::TimedOut)
    }
}

/// Error raised by a failing test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TestError {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

/// Source location of a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TestLocation {
    pub file: String,
    pub line: u32,
}

/// Free-form annotation attached to a test by its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// What an attachment holds, resolved once when a result is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Video,
    Trace,
    NetworkLog,
    ConsoleLog,
    Json,
    Other,
}

impl AttachmentKind {
    /// Classify from the attachment name and content type.
    pub fn classify(name: &str, content_type: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let content_type = content_type.to_ascii_lowercase();

        if name == "video" || content_type.starts_with("video/") {
            AttachmentKind::Video
        } else if name == "trace" {
            AttachmentKind::Trace
        } else if name.contains("network") || name.ends_with(".har") || content_type == "application/har+json" {
            AttachmentKind::NetworkLog
        } else if name.contains("console") {
            AttachmentKind::ConsoleLog
        } else if content_type == "application/json" || content_type.ends_with("+json") || name.ends_with(".json") {
            AttachmentKind::Json
        } else {
            AttachmentKind::Other
        }
    }
}

/// Raw attachment as emitted by the test runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttachment {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub body: Option<String>,
}

/// An attachment with its kind already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub kind: AttachmentKind,
    pub content_type: String,
    pub path: Option<PathBuf>,
    pub body: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        let name = name.into();
        let content_type = content_type.into();
        Self {
            kind: AttachmentKind::classify(&name, &content_type),
            name,
            content_type,
            path: None,
            body: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Inline body, or the file contents when only a path is present.
    pub fn read_text(&self) -> std::io::Result<String> {
        match (&self.body, &self.path) {
            (Some(body), _) => Ok(body.clone()),
            (None, Some(path)) => std::fs::read_to_string(path),
            (None, None) => Ok(String::new()),
        }
    }

    /// File name component of a non-empty path.
    pub fn file_name(&self) -> Option<&str> {
        self.path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
    }
}

impl From<RawAttachment> for Attachment {
    fn from(raw: RawAttachment) -> Self {
        Self {
            kind: AttachmentKind::classify(&raw.name, &raw.content_type),
            name: raw.name,
            content_type: raw.content_type,
            path: raw.path,
            body: raw.body,
        }
    }
}

/// Test runner output as serialized to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTestResult {
    pub title: String,
    pub status: TestStatus,
    #[serde(default)]
    pub error: Option<TestError>,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub location: TestLocation,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// A completed test execution. Read-only to the relay.
#[derive(Debug, Clone)]
pub struct TestExecutionResult {
    pub title: String,
    pub status: TestStatus,
    pub error: Option<TestError>,
    pub retry: u32,
    pub location: TestLocation,
    pub annotations: Vec<Annotation>,
    pub attachments: Vec<Attachment>,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TestExecutionResult {
    pub fn new(title: impl Into<String>, status: TestStatus) -> Self {
        Self {
            title: title.into(),
            status,
            error: None,
            retry: 0,
            location: TestLocation::default(),
            annotations: Vec::new(),
            attachments: Vec::new(),
            start_time: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn with_error(mut self, error: TestError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn attachments_of(&self, kind: AttachmentKind) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(move |a| a.kind == kind)
    }
}

impl From<RawTestResult> for TestExecutionResult {
    fn from(raw: RawTestResult) -> Self {
        Self {
            title: raw.title,
            status: raw.status,
            error: raw.error,
            retry: raw.retry,
            location: raw.location,
            annotations: raw.annotations,
            attachments: raw.attachments.into_iter().map(Attachment::from).collect(),
            start_time: raw.start_time.unwrap_or_else(Utc::now),
            duration_ms: raw.duration_ms,
        }
    }
}

/// Failure evidence delivered to the incident webhook.
///
/// Field order is fixed, so `serde_json::to_vec` is the canonical body that
/// gets signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePayload {
    pub test_title: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    pub retries: u32,
    #[serde(rename = "traceID")]
    pub trace_id: TraceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FailurePayload {
    /// The exact bytes that are transmitted and signed.
    pub fn canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
