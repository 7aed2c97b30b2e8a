//! API error mapping.
//!
//! Every failure leaves the API as `{"success": false, "code", "error"}` with
//! a status that tells the dashboard whether retrying can help.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::approval::DecisionError;
use crate::auth::AuthError;
use crate::incidents::RegistryError;

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Auth(AuthError),
    Forbidden { code: &'static str, message: String },
    NotFound { code: &'static str, message: String },
    InvalidWebhookSignature,
    Decision(DecisionError),
    Registry(RegistryError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) | ApiError::InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Decision(e) => match e {
                DecisionError::UnknownRequest(_) => StatusCode::NOT_FOUND,
                DecisionError::RequestExpired(_) => StatusCode::GONE,
                DecisionError::RequestAlreadyDecided(_) | DecisionError::Conflict(_) => StatusCode::CONFLICT,
                DecisionError::InvalidSignature => StatusCode::UNAUTHORIZED,
            },
            ApiError::Registry(e) => match e {
                RegistryError::UnknownIncident(_) | RegistryError::UnknownRequest(_) => StatusCode::NOT_FOUND,
                RegistryError::InvalidTtl => StatusCode::BAD_REQUEST,
                RegistryError::DuplicateIncident(_)
                | RegistryError::DuplicateRequest { .. }
                | RegistryError::IncidentClosed { .. }
                | RegistryError::StateConflict(_) => StatusCode::CONFLICT,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Auth(e) => e.code(),
            ApiError::Forbidden { code, .. } | ApiError::NotFound { code, .. } => *code,
            ApiError::InvalidWebhookSignature => "invalid_webhook_signature",
            ApiError::Decision(e) => e.code(),
            ApiError::Registry(e) => match e {
                RegistryError::UnknownIncident(_) => "unknown_incident",
                RegistryError::UnknownRequest(_) => "unknown_request",
                RegistryError::DuplicateIncident(_) => "duplicate_incident",
                RegistryError::DuplicateRequest { .. } => "duplicate_request",
                RegistryError::IncidentClosed { .. } => "incident_closed",
                RegistryError::InvalidTtl => "validation_error",
                RegistryError::StateConflict(_) => "state_conflict",
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(m) => m.clone(),
            ApiError::Forbidden { message, .. } | ApiError::NotFound { message, .. } => message.clone(),
            ApiError::Auth(e) => e.to_string(),
            ApiError::InvalidWebhookSignature => "webhook signature does not verify".to_string(),
            ApiError::Decision(e) => e.to_string(),
            ApiError::Registry(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "success": false,
            "code": self.code(),
            "error": self.message(),
        });
        if let ApiError::Registry(RegistryError::DuplicateRequest { request_id, .. }) = &self {
            body["request_id"] = json!(request_id);
        }
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<DecisionError> for ApiError {
    fn from(e: DecisionError) -> Self {
        ApiError::Decision(e)
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}
