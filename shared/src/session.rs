use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::model::CitizenId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no citizen is signed in")]
    NotSignedIn,
    #[error("session token cannot be empty")]
    EmptyToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Citizen,
    Official,
}

/// A signed-in user. The token never appears in `Debug` output.
#[derive(Clone)]
pub struct Session {
    pub citizen_id: CitizenId,
    pub role: Role,
    /// Municipal division the user picked, if any.
    pub division: Option<String>,
    token: SecretString,
}

impl Session {
    pub fn new(citizen_id: CitizenId, token: SecretString) -> Result<Self, SessionError> {
        if token.expose_secret().trim().is_empty() {
            return Err(SessionError::EmptyToken);
        }
        Ok(Self {
            citizen_id,
            role: Role::Citizen,
            division: None,
            token,
        })
    }

    #[must_use]
    pub fn with_division(mut self, division: impl Into<String>) -> Self {
        self.division = Some(division.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("citizen_id", &self.citizen_id)
            .field("role", &self.role)
            .field("division", &self.division)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Holds the current session for the whole process. Constructed once by
/// the shell and handed to whatever needs to know who is signed in.
#[derive(Debug, Default)]
pub struct SessionContext {
    current: RwLock<Option<Session>>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn login(&self, session: Session) {
        info!(citizen_id = %session.citizen_id, "Signed in");
        *self.current.write().await = Some(session);
    }

    pub async fn logout(&self) {
        if let Some(previous) = self.current.write().await.take() {
            info!(citizen_id = %previous.citizen_id, "Signed out");
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    pub async fn is_signed_in(&self) -> bool {
        self.current.read().await.is_some()
    }

    pub async fn require_citizen(&self) -> Result<CitizenId, SessionError> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.citizen_id.clone())
            .ok_or(SessionError::NotSignedIn)
    }

    pub async fn set_division(&self, division: impl Into<String>) -> Result<(), SessionError> {
        let mut current = self.current.write().await;
        let session = current.as_mut().ok_or(SessionError::NotSignedIn)?;
        session.division = Some(division.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session::new(
            CitizenId::new(id).unwrap(),
            SecretString::new("jwt-abc".to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_require_citizen_needs_login() {
        let ctx = SessionContext::new();
        assert_eq!(ctx.require_citizen().await, Err(SessionError::NotSignedIn));

        ctx.login(session("42")).await;
        assert_eq!(ctx.require_citizen().await.unwrap().as_str(), "42");

        ctx.logout().await;
        assert!(!ctx.is_signed_in().await);
    }

    #[tokio::test]
    async fn test_set_division() {
        let ctx = SessionContext::new();
        assert!(ctx.set_division("Ward 12").await.is_err());
        ctx.login(session("1").with_role(Role::Official)).await;
        ctx.set_division("Ward 12").await.unwrap();
        let current = ctx.current().await.unwrap();
        assert_eq!(current.division.as_deref(), Some("Ward 12"));
        assert_eq!(current.role, Role::Official);
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", session("1"));
        assert!(!debug.contains("jwt-abc"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_empty_token_rejected() {
        let result = Session::new(CitizenId::new("1").unwrap(), SecretString::new("  ".into()));
        assert!(matches!(result, Err(SessionError::EmptyToken)));
    }
}
