//! Route handlers.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, Path, Query, State},
    http::HeaderMap,
    response::Response,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::approval::{ApprovalDecision, ApprovalStats, AuditRecord};
use crate::auth::{bearer_token, UserInfo};
use crate::correlation::{TraceContext, TRACEPARENT};
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::incidents::{Incident, IncidentSubmission, Priority};
use crate::realtime::run_session;
use crate::transport::{verify_signature, SIGNATURE_HEADER};

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "incident-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
        "websocket_connections": state.broadcaster.session_count(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let session = state.sessions.login(&body.username, &body.password)?;
    Ok(Json(json!({
        "success": true,
        "token": session.token,
        "user": session.user,
        "expires_at": session.expires_at,
    })))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let revoked = bearer_token(&headers).is_some_and(|t| state.sessions.logout(t));
    Json(json!({"success": true, "revoked": revoked}))
}

/// `POST /webhook/incident`. Signature is required only when a webhook
/// secret is configured.
pub async fn incident_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let webhook = state.webhook.load();
    if !webhook.secret.is_empty() {
        let supplied = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::InvalidWebhookSignature)?;
        if !verify_signature(webhook.secret.as_bytes(), &body, supplied) {
            tracing::warn!("Webhook rejected: signature mismatch");
            return Err(ApiError::InvalidWebhookSignature);
        }
    }

    let value: Value = serde_json::from_slice(&body).map_err(|e| ApiError::Validation(e.to_string()))?;
    if !value.is_object() {
        return Err(ApiError::Validation("expected a JSON object".to_string()));
    }
    // senders may wrap the incident as {"incident": {...}, "source": "..."}
    let envelope_source = value.get("source").and_then(Value::as_str).map(str::to_string);
    let inner = match value.get("incident") {
        Some(incident) if incident.is_object() => incident.clone(),
        _ => value,
    };
    let mut submission: IncidentSubmission =
        serde_json::from_value(inner).map_err(|e| ApiError::Validation(e.to_string()))?;
    if submission.source.is_none() {
        submission.source = envelope_source;
    }
    if submission.trace_id.is_none() {
        submission.trace_id = headers
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(TraceContext::parse_traceparent)
            .map(|ctx| ctx.trace_id);
    }

    let incident = state.registry.create_incident_from(submission).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Incident received and processed",
        "incident_id": incident.id,
        "broadcasted_to": state.broadcaster.active_count(),
    })))
}

pub async fn list_incidents(State(state): State<AppState>) -> Json<Value> {
    let incidents = state.registry.list_incidents_swept().await;
    Json(json!({
        "success": true,
        "count": incidents.len(),
        "incidents": incidents,
    }))
}

pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    state.registry.sweep_expired(Utc::now()).await;
    state.registry.incident(&id).map(Json).ok_or_else(|| ApiError::NotFound {
        code: "unknown_incident",
        message: format!("unknown incident {id}"),
    })
}

pub async fn investigate(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let incident = state.registry.start_investigation(&id, &user.id).await?;
    Ok(Json(json!({"success": true, "incident": incident})))
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequestBody {
    pub incident_id: String,
    #[serde(default)]
    pub priority: Priority,
    /// Overrides the priority-based TTL.
    pub ttl_secs: Option<u64>,
}

pub async fn request_approval(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    payload: Result<Json<ApprovalRequestBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let request = state
        .registry
        .create_approval_request(
            &body.incident_id,
            body.priority,
            body.ttl_secs.map(Duration::from_secs),
            &user.id,
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "request_id": request.request_id,
        "expires_at": request.expires_at,
        "request": request,
    })))
}

pub async fn submit_decision(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    payload: Result<Json<ApprovalDecision>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(decision) = payload?;
    if decision.user_id != user.id {
        return Err(ApiError::Forbidden {
            code: "user_mismatch",
            message: "decision user_id does not match the session".to_string(),
        });
    }

    let incident = state.coordinator.submit_decision(&decision).await?;
    Ok(Json(json!({
        "success": true,
        "request_id": decision.request_id,
        "decision": decision.decision,
        "incident": incident,
    })))
}

pub async fn approval_stats(State(state): State<AppState>) -> Json<ApprovalStats> {
    Json(ApprovalStats::from_requests(&state.registry.requests()))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub incident_id: Option<String>,
}

pub async fn audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditRecord>> {
    Json(state.registry.audit().records(query.incident_id.as_deref()))
}

pub async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let send_timeout = Duration::from_millis(state.realtime.send_timeout_ms);
    ws.on_upgrade(move |socket| run_session(socket, state.broadcaster.clone(), state.sessions.clone(), send_timeout))
}
