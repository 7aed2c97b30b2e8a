use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Header the relay checks for webhook signatures.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("not logged in")]
    NotLoggedIn,
}

impl SdkError {
    /// The relay's machine-readable error code, if this is an API error.
    pub fn code(&self) -> Option<&str> {
        match self {
            SdkError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Value,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub incident_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// Body of `POST /api/approval/decision`. The signature is computed by the
/// caller over the canonical decision fields.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionBody {
    pub request_id: String,
    pub decision: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub signature: String,
    pub timestamp: String,
}

pub struct RelayClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder, SdkError> {
        let token = self.token.as_deref().ok_or(SdkError::NotLoggedIn)?;
        Ok(builder.bearer_auth(token))
    }

    pub async fn health(&self) -> Result<Value, SdkError> {
        send(self.client.get(self.url("/health"))).await
    }

    /// Log in and keep the session token for later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<LoginResponse, SdkError> {
        let body = serde_json::json!({"username": username, "password": password});
        let login: LoginResponse = send(self.client.post(self.url("/api/auth/login")).json(&body)).await?;
        self.token = Some(login.token.clone());
        Ok(login)
    }

    pub async fn logout(&mut self) -> Result<Value, SdkError> {
        let response = send(self.authed(self.client.post(self.url("/api/auth/logout")))?).await;
        self.token = None;
        response
    }

    /// Post an incident. `signature` is the full `sha256=<hex>` header value.
    pub async fn report_incident(&self, body: &Value, signature: Option<&str>) -> Result<Value, SdkError> {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        self.report_incident_raw(bytes, signature).await
    }

    /// Post pre-serialized bytes, so the signature covers exactly what is sent.
    pub async fn report_incident_raw(&self, bytes: Vec<u8>, signature: Option<&str>) -> Result<Value, SdkError> {
        let mut builder = self
            .client
            .post(self.url("/webhook/incident"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes);
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        send(builder).await
    }

    pub async fn incidents(&self) -> Result<Vec<Value>, SdkError> {
        let list: Value = send(self.client.get(self.url("/api/incidents"))).await?;
        Ok(list
            .get("incidents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn incident(&self, id: &str) -> Result<Value, SdkError> {
        send(self.client.get(self.url(&format!("/api/incidents/{id}")))).await
    }

    pub async fn investigate(&self, id: &str) -> Result<Value, SdkError> {
        send(self.authed(self.client.post(self.url(&format!("/api/incidents/{id}/investigate"))))?).await
    }

    pub async fn request_approval(&self, request: &ApprovalRequest) -> Result<Value, SdkError> {
        send(self.authed(self.client.post(self.url("/api/approval/request")))?.json(request)).await
    }

    pub async fn submit_decision(&self, decision: &DecisionBody) -> Result<Value, SdkError> {
        send(self.authed(self.client.post(self.url("/api/approval/decision")))?.json(decision)).await
    }

    pub async fn stats(&self) -> Result<Value, SdkError> {
        send(self.client.get(self.url("/api/approval/stats"))).await
    }

    pub async fn audit(&self, incident_id: Option<&str>) -> Result<Value, SdkError> {
        let mut builder = self.client.get(self.url("/api/audit"));
        if let Some(id) = incident_id {
            builder = builder.query(&[("incident_id", id)]);
        }
        send(self.authed(builder)?).await
    }
}

async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, SdkError> {
    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        return Err(SdkError::Api {
            status: status.as_u16(),
            code: body
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            message: body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(text),
        });
    }
    Ok(response.json().await?)
}
