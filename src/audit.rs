//! Security audit trail.
//!
//! Login, logout and authorization events are handed to an [`AuditSink`].
//! Recording is fire-and-forget: the guard logs sink failures and carries on.
//! Events have no field capable of holding a secret.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Provider, Role};
use crate::store::{SessionStore, StoreError, SECURITY_LOG_KEY};

/// Default number of entries retained by [`StoreAuditSink`].
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Audit-related errors.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Backing store failed.
    #[error("audit store error: {0}")]
    Store(#[from] StoreError),

    /// Entry could not be encoded.
    #[error("audit encoding error: {0}")]
    Encode(String),

    /// Sink lock poisoned.
    #[error("audit sink lock poisoned")]
    Poisoned,
}

/// Kinds of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A verifier accepted the credentials and a session was issued.
    LoginSuccess,
    /// Credentials were rejected, or the key was locked out.
    LoginFailed,
    /// A session was ended on request.
    Logout,
    /// A session went idle past the timeout.
    SessionExpired,
    /// A permission or resource check was denied.
    UnauthorizedAccess,
    /// A reset email was requested from the provider.
    PasswordResetRequested,
    /// The provider refused or could not send a reset email.
    PasswordResetFailed,
    /// A coordinator registered a new account.
    PrincipalCreated,
}

impl AuditEventType {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::Logout => "logout",
            AuditEventType::SessionExpired => "session_expired",
            AuditEventType::UnauthorizedAccess => "unauthorized_access",
            AuditEventType::PasswordResetRequested => "password_reset_requested",
            AuditEventType::PasswordResetFailed => "password_reset_failed",
            AuditEventType::PrincipalCreated => "principal_created",
        }
    }

    /// Events that warrant operator attention.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            AuditEventType::LoginFailed
                | AuditEventType::UnauthorizedAccess
                | AuditEventType::PasswordResetRequested
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique record id.
    pub id: String,
    /// Event kind.
    pub event_type: AuditEventType,
    /// Normalized credential key involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Role of the principal involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Provider involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    /// Failure count after this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Session length for logout/expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Short machine-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the secondary verifier produced the outcome.
    #[serde(default)]
    pub fallback_used: bool,
    /// Session token involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Start a new event.
    pub fn new(event_type: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            key: None,
            role: None,
            provider: None,
            attempts: None,
            duration_ms: None,
            reason: None,
            fallback_used: false,
            session_id: None,
            timestamp,
        }
    }

    /// Normalized credential key involved.
    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    /// Role of the principal involved.
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Provider that verified or issued the session.
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Consecutive failures recorded for the key.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Session length at logout or expiry.
    pub fn duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Free-form reason for a failure or denial.
    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Whether the secondary verifier answered.
    pub fn fallback_used(mut self, used: bool) -> Self {
        self.fallback_used = used;
        self
    }

    /// Session token the event belongs to.
    pub fn session_id(mut self, token: &str) -> Self {
        self.session_id = Some(token.to_string());
        self
    }
}

/// Criteria for reading back audit records.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Only this event kind.
    pub event_type: Option<AuditEventType>,
    /// Only this key.
    pub key: Option<String>,
    /// Not before this instant.
    pub since: Option<DateTime<Utc>>,
    /// Not after this instant.
    pub until: Option<DateTime<Utc>>,
    /// At most this many records (newest first). `None` means 100.
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Whether an event passes the filter (ignoring `limit`).
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.map_or(true, |t| t == event.event_type)
            && self
                .key
                .as_deref()
                .map_or(true, |k| event.key.as_deref() == Some(k))
            && self.since.map_or(true, |s| event.timestamp >= s)
            && self.until.map_or(true, |u| event.timestamp <= u)
    }

    /// Apply the filter to records stored oldest first.
    pub fn apply<'a, I>(&self, events: I) -> Vec<AuditEvent>
    where
        I: DoubleEndedIterator<Item = &'a AuditEvent>,
    {
        events
            .rev()
            .filter(|e| self.matches(e))
            .take(self.limit.unwrap_or(100))
            .cloned()
            .collect()
    }
}

/// Destination for security events.
pub trait AuditSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;

    /// Read back events, newest first. Sinks that cannot be read return none.
    fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(Vec::new())
    }
}

/// Emits events as structured `tracing` records under the `security` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let key = event.key.as_deref().unwrap_or("-");
        let provider = event.provider.map(|p| p.as_str()).unwrap_or("-");
        if event.event_type.is_critical() {
            warn!(
                target: "security",
                event = %event.event_type,
                key = %key,
                provider = %provider,
                attempts = ?event.attempts,
                reason = ?event.reason,
                "Security event"
            );
        } else {
            info!(
                target: "security",
                event = %event.event_type,
                key = %key,
                provider = %provider,
                duration_ms = ?event.duration_ms,
                fallback_used = event.fallback_used,
                "Security event"
            );
        }
        Ok(())
    }
}

/// Keeps a bounded log in the session store, oldest entries dropped first.
pub struct StoreAuditSink {
    store: Arc<dyn SessionStore>,
    max_entries: usize,
    // Serializes read-modify-write of the stored log.
    lock: Mutex<()>,
}

impl StoreAuditSink {
    /// Create a sink writing into `store`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_capacity(store, DEFAULT_MAX_ENTRIES)
    }

    /// Create a sink retaining at most `max_entries` records.
    pub fn with_capacity(store: Arc<dyn SessionStore>, max_entries: usize) -> Self {
        Self {
            store,
            max_entries: max_entries.max(1),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<VecDeque<AuditEvent>, AuditError> {
        match self.store.get(SECURITY_LOG_KEY)? {
            None => Ok(VecDeque::new()),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable security log");
                    Ok(VecDeque::new())
                }
            },
        }
    }
}

impl fmt::Debug for StoreAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreAuditSink")
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl AuditSink for StoreAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let _guard = self.lock.lock().map_err(|_| AuditError::Poisoned)?;
        let mut entries = self.load()?;
        entries.push_back(event.clone());
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        let raw = serde_json::to_string(&entries).map_err(|e| AuditError::Encode(e.to_string()))?;
        self.store.set(SECURITY_LOG_KEY, &raw)?;
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        let _guard = self.lock.lock().map_err(|_| AuditError::Poisoned)?;
        let entries = self.load()?;
        Ok(filter.apply(entries.iter()))
    }
}

/// In-memory sink, handy for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded events of one kind, oldest first.
    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(event.clone());
        Ok(())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self.events.lock().map_err(|_| AuditError::Poisoned)?;
        Ok(filter.apply(events.iter()))
    }
}

/// Sends each event to several sinks. Fails if any of them fails, after
/// trying all of them.
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink. The first sink added answers queries.
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        match self.sinks.first() {
            Some(sink) => sink.query(filter),
            None => Ok(Vec::new()),
        }
    }
}
