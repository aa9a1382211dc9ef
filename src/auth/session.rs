//! Authenticated session records.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::credential::Principal;
use super::role::Role;
use crate::clock::elapsed_millis;

/// Default idle timeout (24 hours).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Maximum consecutive failed logins before lockout.
pub const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Lockout window (15 minutes).
pub const LOCKOUT_DURATION_SECS: u64 = 15 * 60;

/// Authentication errors surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Too many failures; verification suppressed for the given seconds.
    #[error("account locked for {0} seconds")]
    Locked(u64),

    /// Wrong credentials; attempts left before lockout.
    #[error("invalid credentials ({0} attempts remaining)")]
    InvalidCredentials(u32),

    /// The last session went idle for longer than the timeout.
    #[error("session expired")]
    SessionExpired,

    /// Persisted session could not be decoded.
    #[error("malformed session: {0}")]
    MalformedSession(String),

    /// No session present.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The session store refused a write needed to complete the flow.
    #[error("session storage failed: {0}")]
    Storage(String),
}

/// Identity provider a session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Static local credential table.
    Local,
    /// Remote identity service.
    Remote,
}

impl Provider {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Remote => "remote",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the guard's single session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// No session.
    Anonymous,
    /// A login flow is awaiting its verifier.
    Authenticating,
    /// A live session exists.
    Authenticated,
    /// The last session was dropped for inactivity.
    Expired,
    /// The last session ended by logout.
    LoggedOut,
}

impl GuardState {
    /// Whether a session is live.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, GuardState::Authenticated)
    }
}

/// A logged-in principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session token (UUID v4).
    pub token: String,
    /// Provider-side principal id.
    pub principal_id: String,
    /// Normalized key used to log in.
    pub key: String,
    /// Name shown in the UI.
    pub display_name: String,
    /// Role.
    pub role: Role,
    /// Capability tags.
    pub permissions: BTreeSet<String>,
    /// When the session was created.
    pub issued_at: DateTime<Utc>,
    /// Last liveness check.
    pub last_activity_at: DateTime<Utc>,
    /// Where the principal was verified.
    pub provider: Provider,
}

impl Session {
    /// Open a session for a verified principal.
    pub fn new(principal: Principal, provider: Provider, now: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            principal_id: principal.id,
            key: principal.key,
            display_name: principal.display_name,
            role: principal.role,
            permissions: principal.permissions,
            issued_at: now,
            last_activity_at: now,
            provider,
        }
    }

    /// Whether the session has been idle for strictly longer than `timeout_ms`.
    pub fn is_idle(&self, now: DateTime<Utc>, timeout_ms: i64) -> bool {
        elapsed_millis(self.last_activity_at, now) > timeout_ms
    }

    /// Record activity. Never moves `last_activity_at` backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Milliseconds since the session was issued.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        elapsed_millis(self.issued_at, now)
    }

    /// Serialize for the session store.
    pub fn to_json(&self) -> Result<String, AuthError> {
        serde_json::to_string(self).map_err(|e| AuthError::Storage(e.to_string()))
    }

    /// Decode a stored session, rejecting records that break invariants.
    pub fn from_json(raw: &str) -> Result<Self, AuthError> {
        let session: Session =
            serde_json::from_str(raw).map_err(|e| AuthError::MalformedSession(e.to_string()))?;
        if session.last_activity_at < session.issued_at {
            return Err(AuthError::MalformedSession(
                "last activity precedes issue time".to_string(),
            ));
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn principal() -> Principal {
        Principal {
            id: "func@clinica.com".into(),
            key: "func@clinica.com".into(),
            display_name: "Dra. Maria Santos".into(),
            role: Role::Staff,
            permissions: ["clients", "schedule", "reports"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_session_new() {
        let session = Session::new(principal(), Provider::Local, at(1_000));
        assert!(!session.token.is_empty());
        assert_eq!(session.issued_at, session.last_activity_at);
        assert_eq!(session.role, Role::Staff);
        assert_eq!(session.provider, Provider::Local);
    }

    #[test]
    fn test_session_token_uniqueness() {
        let a = Session::new(principal(), Provider::Local, at(0));
        let b = Session::new(principal(), Provider::Local, at(0));
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_session_idle_strictly_greater() {
        let session = Session::new(principal(), Provider::Local, at(0));
        assert!(!session.is_idle(at(1_000), 1_000));
        assert!(session.is_idle(at(1_001), 1_000));
    }

    #[test]
    fn test_touch_monotonic() {
        let mut session = Session::new(principal(), Provider::Local, at(5_000));
        session.touch(at(4_000));
        assert_eq!(session.last_activity_at, at(5_000));
        session.touch(at(6_000));
        assert_eq!(session.last_activity_at, at(6_000));
        assert_eq!(session.duration_ms(at(6_000)), 1_000);
    }

    #[test]
    fn test_json_roundtrip() {
        let session = Session::new(principal(), Provider::Remote, at(0) + Duration::days(1));
        let raw = session.to_json().unwrap();
        assert!(raw.contains("\"provider\":\"remote\""));
        assert_eq!(Session::from_json(&raw).unwrap(), session);
    }

    #[test]
    fn test_from_json_malformed() {
        assert!(matches!(
            Session::from_json("{not json"),
            Err(AuthError::MalformedSession(_))
        ));
        assert!(matches!(
            Session::from_json("{\"token\":\"x\"}"),
            Err(AuthError::MalformedSession(_))
        ));
    }

    #[test]
    fn test_from_json_rejects_inverted_times() {
        let mut session = Session::new(principal(), Provider::Local, at(10_000));
        session.last_activity_at = at(0);
        let raw = serde_json::to_string(&session).unwrap();
        assert!(matches!(
            Session::from_json(&raw),
            Err(AuthError::MalformedSession(_))
        ));
    }

    #[test]
    fn test_from_json_unknown_role() {
        let session = Session::new(principal(), Provider::Local, at(0));
        let raw = session.to_json().unwrap().replace("\"staff\"", "\"janitor\"");
        assert!(Session::from_json(&raw).is_err());
    }

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            AuthError::Locked(900).to_string(),
            "account locked for 900 seconds"
        );
        assert_eq!(
            AuthError::InvalidCredentials(4).to_string(),
            "invalid credentials (4 attempts remaining)"
        );
        assert_eq!(AuthError::SessionExpired.to_string(), "session expired");
        assert_eq!(AuthError::NotAuthenticated.to_string(), "not authenticated");
    }

    #[test]
    fn test_guard_state() {
        assert!(GuardState::Authenticated.is_authenticated());
        assert!(!GuardState::Expired.is_authenticated());
        assert!(!GuardState::Anonymous.is_authenticated());
    }
}
