//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse, apply environment overrides, and validate a TOML document.
pub fn parse_config(content: &str) -> Result<RelayConfig, ConfigError> {
    let mut config: RelayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Secrets may be supplied through the environment instead of the file.
fn apply_env_overrides(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(secret) = lookup("RELAY_WEBHOOK_SECRET") {
        config.webhook.secret = secret;
    }
    if let Some(secret) = lookup("RELAY_APPROVAL_SECRET") {
        config.approval.secret = secret;
    }
    if let Some(secret) = lookup("RELAY_TRANSPORT_SECRET") {
        config.transport.secret = secret;
    }
}
