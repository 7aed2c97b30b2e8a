//! One observer WebSocket connection.
//!
//! ```text
//! socket ─┬─ reader: ClientMessage → broadcaster / session store
//!         └─ writer task: queue → socket, each write bounded by send_timeout
//! ```
//! Either half ending closes the session.

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::auth::SessionStore;
use crate::realtime::broadcaster::{RealtimeBroadcaster, SessionId};
use crate::realtime::messages::{ClientMessage, ServerMessage};

pub async fn run_session(
    socket: WebSocket,
    broadcaster: Arc<RealtimeBroadcaster>,
    sessions: Arc<SessionStore>,
    send_timeout: Duration,
) {
    let (id, mut queue) = broadcaster.register();
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = queue.recv().await {
            match time::timeout(send_timeout, sink.send(Message::Text(text.to_string().into()))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(session_id = %id, error = %e, "Socket write failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(session_id = %id, timeout_ms = send_timeout.as_millis() as u64, "Socket write timed out, closing session");
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    broadcaster.send_to(
        &id,
        ServerMessage::ConnectionEstablished {
            session_id: id.to_string(),
            timestamp: Utc::now(),
        }
        .to_text(),
    );
    tracing::info!(session_id = %id, sessions = broadcaster.session_count(), "Observer connected");

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_message(&id, text.as_str(), &broadcaster, &sessions);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session_id = %id, error = %e, "Socket read failed");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    broadcaster.unregister(&id);
    writer.abort();
    tracing::info!(session_id = %id, "Observer disconnected");
}

fn handle_message(id: &SessionId, text: &str, broadcaster: &RealtimeBroadcaster, sessions: &SessionStore) {
    let reply = match ClientMessage::parse(text) {
        ClientMessage::Authenticate { token } => match sessions.validate(&token) {
            Ok(user) => {
                tracing::info!(session_id = %id, user_id = %user.id, "Observer authenticated");
                let channels = broadcaster.authenticate(id, user.clone());
                ServerMessage::Authenticated { user, channels }
            }
            Err(e) => ServerMessage::AuthenticationFailed { code: e.code() },
        },
        ClientMessage::Subscribe { channels } => ServerMessage::Subscribed {
            channels: broadcaster.subscribe(id, &channels),
        },
        ClientMessage::UnknownChannels(names) => ServerMessage::Error {
            code: "unknown_channels",
            message: format!("no known channels in [{}]", names.join(", ")),
        },
        ClientMessage::Ping => ServerMessage::Pong { timestamp: Utc::now() },
        ClientMessage::Decision => ServerMessage::Error {
            code: "decisions_not_accepted",
            message: "decisions must be submitted to POST /api/approval/decision".to_string(),
        },
        ClientMessage::Unknown(kind) => ServerMessage::Error {
            code: "unknown_message_type",
            message: format!("unsupported message type {kind}"),
        },
        ClientMessage::Malformed => ServerMessage::Error {
            code: "malformed_message",
            message: "expected a JSON object with a type field".to_string(),
        },
    };
    broadcaster.send_to(id, reply.to_text());
}
