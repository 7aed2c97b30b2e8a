//! Opaque session tokens for dashboard users.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::{AuthConfig, UserConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("unknown or revoked token")]
    InvalidToken,

    #[error("session expired")]
    Expired,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidToken => "invalid_token",
            AuthError::Expired => "session_expired",
        }
    }
}

/// Public view of a user; never carries the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub name: String,
    pub role: String,
}

impl From<&UserConfig> for UserInfo {
    fn from(user: &UserConfig) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: UserInfo,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    users: ArcSwap<Vec<UserConfig>>,
    sessions: DashMap<String, Session>,
    ttl: ArcSwap<Duration>,
}

impl SessionStore {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            users: ArcSwap::from_pointee(config.users.clone()),
            sessions: DashMap::new(),
            ttl: ArcSwap::from_pointee(Duration::from_secs(config.session_ttl_secs)),
        }
    }

    /// Apply a reloaded user list. Existing sessions stay valid until expiry.
    pub fn update(&self, config: &AuthConfig) {
        self.users.store(Arc::new(config.users.clone()));
        self.ttl.store(Arc::new(Duration::from_secs(config.session_ttl_secs)));
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let users = self.users.load();
        let user = users
            .iter()
            .find(|u| u.username == username)
            .filter(|u| bool::from(u.password.as_bytes().ct_eq(password.as_bytes())))
            .ok_or(AuthError::InvalidCredentials)?;

        let ttl = chrono::Duration::from_std(**self.ttl.load()).unwrap_or(chrono::Duration::hours(12));
        let session = Session {
            token: generate_token(),
            user: UserInfo::from(user),
            expires_at: Utc::now() + ttl,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        tracing::info!(user_id = %session.user.id, username = %username, "User logged in");
        Ok(session)
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn validate(&self, token: &str) -> Result<UserInfo, AuthError> {
        let session = self
            .sessions
            .get(token)
            .map(|s| s.value().clone())
            .ok_or(AuthError::InvalidToken)?;
        if session.expires_at <= Utc::now() {
            self.sessions.remove(token);
            return Err(AuthError::Expired);
        }
        Ok(session.user)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before - self.sessions.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

/// 64 lowercase hex characters.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_validate_logout() {
        let store = SessionStore::new(&AuthConfig::default());
        let session = store.login("admin", "admin").unwrap();
        assert_eq!(session.token.len(), 64);
        assert!(session.token.chars().all(|c| c.is_ascii_hexdigit()));

        let user = store.validate(&session.token).unwrap();
        assert_eq!(user.id, "1");
        assert_eq!(user.role, "admin");

        assert!(store.logout(&session.token));
        assert_eq!(store.validate(&session.token).unwrap_err(), AuthError::InvalidToken);
    }

    #[test]
    fn test_bad_credentials() {
        let store = SessionStore::new(&AuthConfig::default());
        assert_eq!(store.login("admin", "nope").unwrap_err(), AuthError::InvalidCredentials);
        assert_eq!(store.login("ghost", "admin").unwrap_err(), AuthError::InvalidCredentials);
    }

    #[test]
    fn test_expired_session() {
        let store = SessionStore::new(&AuthConfig {
            session_ttl_secs: 0,
            ..AuthConfig::default()
        });
        let session = store.login("admin", "admin").unwrap();
        assert_eq!(store.validate(&session.token).unwrap_err(), AuthError::Expired);
        assert_eq!(store.active_sessions(), 0);
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }
}
