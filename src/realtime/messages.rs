//! Control messages exchanged on `/ws`, besides relayed events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::auth::UserInfo;
use crate::realtime::events::Channel;

/// Parsed client → server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Authenticate { token: String },
    Subscribe { channels: Vec<Channel> },
    /// A subscribe whose channel list named nothing this relay publishes.
    UnknownChannels(Vec<String>),
    Ping,
    /// Any attempt to submit a decision over the socket.
    Decision,
    Unknown(String),
    Malformed,
}

const DECISION_TYPES: &[&str] = &["approval_decision", "decision", "submit_decision", "approve", "reject"];

impl ClientMessage {
    pub fn parse(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return ClientMessage::Malformed;
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return ClientMessage::Malformed;
        };

        match kind {
            "authenticate" => match value.get("token").and_then(Value::as_str) {
                Some(token) => ClientMessage::Authenticate { token: token.to_string() },
                None => ClientMessage::Malformed,
            },
            "subscribe" => match parse_channels(value.get("channels")) {
                Ok(channels) => ClientMessage::Subscribe { channels },
                Err(names) => ClientMessage::UnknownChannels(names),
            },
            "ping" => ClientMessage::Ping,
            k if DECISION_TYPES.contains(&k) => ClientMessage::Decision,
            other => ClientMessage::Unknown(other.to_string()),
        }
    }
}

/// Unknown names are dropped next to known ones. A missing or empty list
/// means all channels; a list of only unknown names is an error.
fn parse_channels(value: Option<&Value>) -> Result<Vec<Channel>, Vec<String>> {
    let mut channels = Vec::new();
    let mut unknown = Vec::new();
    for item in value.and_then(Value::as_array).into_iter().flatten() {
        match serde_json::from_value::<Channel>(item.clone()) {
            Ok(channel) if !channels.contains(&channel) => channels.push(channel),
            Ok(_) => {}
            Err(_) => unknown.push(item.as_str().map_or_else(|| item.to_string(), str::to_string)),
        }
    }
    if channels.is_empty() && !unknown.is_empty() {
        return Err(unknown);
    }
    Ok(channels)
}

/// Server → client control message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    Authenticated {
        user: UserInfo,
        channels: Vec<Channel>,
    },
    AuthenticationFailed {
        code: &'static str,
    },
    Subscribed {
        channels: Vec<Channel>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

impl ServerMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","code":"internal"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_messages() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"authenticate","token":"t"}"#),
            ClientMessage::Authenticate { token: "t".into() }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe","channels":["approvals","bogus"]}"#),
            ClientMessage::Subscribe { channels: vec![Channel::Approvals] }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe"}"#),
            ClientMessage::Subscribe { channels: vec![] }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe","channels":[]}"#),
            ClientMessage::Subscribe { channels: vec![] }
        );
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#), ClientMessage::Ping);
        assert_eq!(
            ClientMessage::parse(r#"{"type":"approval_decision","request_id":"r"}"#),
            ClientMessage::Decision
        );
        assert_eq!(ClientMessage::parse("not json"), ClientMessage::Malformed);
        assert_eq!(ClientMessage::parse(r#"{"type":"authenticate"}"#), ClientMessage::Malformed);
    }

    #[test]
    fn test_subscribe_with_only_unknown_channels() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe","channels":["bogus",7]}"#),
            ClientMessage::UnknownChannels(vec!["bogus".into(), "7".into()])
        );
    }

    #[test]
    fn test_server_message_shape() {
        let text = ServerMessage::Error {
            code: "decisions_not_accepted",
            message: "use the HTTP API".into(),
        }
        .to_text();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "decisions_not_accepted");
    }
}
