//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (TTLs > 0, addresses parse, URLs parse)
//! - Detect contradictory settings (required signature without a secret)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::RelayConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.webhook.require_signature && config.webhook.secret.is_empty() {
        errors.push(ValidationError::new(
            "webhook.require_signature",
            "signature required but webhook.secret is empty",
        ));
    }

    if Url::parse(&config.transport.endpoint).is_err() {
        errors.push(ValidationError::new(
            "transport.endpoint",
            format!("'{}' is not a URL", config.transport.endpoint),
        ));
    }
    if config.transport.timeout_ms == 0 {
        errors.push(ValidationError::new("transport.timeout_ms", "must be > 0"));
    }
    if config.transport.max_delay_ms < config.transport.base_delay_ms {
        errors.push(ValidationError::new(
            "transport.max_delay_ms",
            "must be >= transport.base_delay_ms",
        ));
    }

    if config.approval.default_ttl_secs == 0 {
        errors.push(ValidationError::new("approval.default_ttl_secs", "must be > 0"));
    }
    if config.approval.critical_ttl_secs == 0 {
        errors.push(ValidationError::new("approval.critical_ttl_secs", "must be > 0"));
    }
    if config.approval.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("approval.sweep_interval_secs", "must be > 0"));
    }

    if config.realtime.session_buffer == 0 {
        errors.push(ValidationError::new("realtime.session_buffer", "must be > 0"));
    }

    if !config.remediation.endpoint.is_empty() && Url::parse(&config.remediation.endpoint).is_err() {
        errors.push(ValidationError::new(
            "remediation.endpoint",
            format!("'{}' is not a URL", config.remediation.endpoint),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for user in &config.auth.users {
        if !seen.insert(user.username.as_str()) {
            errors.push(ValidationError::new(
                "auth.users",
                format!("duplicate username '{}'", user.username),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
