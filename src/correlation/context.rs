//! W3C Trace Context (`traceparent`) parsing and injection.
//!
//! Wire format: `version-traceid-parentid-flags`, e.g.
//! `00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01`.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TRACE_ID_LEN: usize = 32;
pub const PARENT_ID_LEN: usize = 16;
pub const FLAGS_LEN: usize = 2;

/// Header name carrying the W3C trace context.
pub const TRACEPARENT: &str = "traceparent";

/// A validated 32-lowercase-hex trace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId(String);

impl TraceId {
    /// Accepts exactly 32 hex characters (any case), normalized to lowercase.
    /// The all-zero id is invalid per W3C Trace Context.
    pub fn parse(candidate: &str) -> Option<Self> {
        if !is_hex_of_len(candidate, TRACE_ID_LEN) {
            return None;
        }
        let normalized = candidate.to_ascii_lowercase();
        if normalized.bytes().all(|b| b == b'0') {
            return None;
        }
        Some(Self(normalized))
    }

    /// Build from raw bytes; the first 16 bytes are used.
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        let mut hex = hex::encode(&digest[..digest.len().min(TRACE_ID_LEN / 2)]);
        // A digest shorter than 16 bytes is padded so the length invariant holds.
        while hex.len() < TRACE_ID_LEN {
            hex.push('0');
        }
        if hex.bytes().all(|b| b == b'0') {
            hex.replace_range(TRACE_ID_LEN - 1.., "1");
        }
        Self(hex)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; TRACE_ID_LEN / 2];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_digest(&bytes)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TraceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid trace id '{}'", value))
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.0
    }
}

/// Trace id, parent span id and sampling flags of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub parent_id: String,
    pub flags: String,
}

impl TraceContext {
    /// Fresh sampled context, as injected into outgoing test requests.
    pub fn generate() -> Self {
        let mut parent = [0u8; PARENT_ID_LEN / 2];
        rand::thread_rng().fill_bytes(&mut parent);
        if parent.iter().all(|b| *b == 0) {
            parent[PARENT_ID_LEN / 2 - 1] = 1;
        }
        Self {
            trace_id: TraceId::random(),
            parent_id: hex::encode(parent),
            flags: "01".to_string(),
        }
    }

    /// Parse a `traceparent` header value.
    ///
    /// Exactly four dash-separated fields are required and the trace id must
    /// be 32 hex characters. The parent id and flags are accepted only in
    /// their fixed widths.
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let fields: Vec<&str> = value.trim().split('-').collect();
        let [version, trace_id, parent_id, flags] = fields.as_slice() else {
            return None;
        };
        if !is_hex_of_len(version, 2) || version.eq_ignore_ascii_case("ff") {
            return None;
        }
        let trace_id = TraceId::parse(trace_id)?;
        if !is_hex_of_len(parent_id, PARENT_ID_LEN) || !is_hex_of_len(flags, FLAGS_LEN) {
            return None;
        }
        Some(Self {
            trace_id,
            parent_id: parent_id.to_ascii_lowercase(),
            flags: flags.to_ascii_lowercase(),
        })
    }

    /// Render as a version 00 `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{}", self.trace_id, self.parent_id, self.flags)
    }

    pub fn is_sampled(&self) -> bool {
        u8::from_str_radix(&self.flags, 16).map(|f| f & 0x01 == 1).unwrap_or(false)
    }
}

pub(crate) fn is_hex_of_len(candidate: &str, len: usize) -> bool {
    candidate.len() == len && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}
