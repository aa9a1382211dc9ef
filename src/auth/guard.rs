//! The session and credential guard.
//!
//! [`AuthGuard`] owns one session slot. It throttles login attempts per
//! credential key, verifies credentials through a primary verifier with an
//! explicit fallback, persists the session in a [`SessionStore`], and answers
//! authorization questions for the rest of the application.
//!
//! All mutating operations take `&mut self`, so at most one login or logout
//! flow is in flight per guard. Guard state is only mutated after a verifier
//! call has returned: dropping an `attempt_login` future mid-flight leaves the
//! attempt counters exactly as they were.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::credential::{normalize_key, NewPrincipal, Principal};
use super::limiter::{LimitResult, LoginLimiter};
use super::password::{validate_password, PasswordError};
use super::permission::{self, PermissionError};
use super::remote::RemoteVerifier;
use super::session::{
    AuthError, GuardState, Provider, Session, DEFAULT_SESSION_TIMEOUT_SECS, LOCKOUT_DURATION_SECS,
    MAX_LOGIN_ATTEMPTS,
};
use super::verifier::{CredentialVerifier, LocalTable, VerifyError};
use crate::audit::{
    AuditError, AuditEvent, AuditEventType, AuditFilter, AuditSink, FanoutAuditSink,
    StoreAuditSink, TracingAuditSink,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthConfig, Config, FallbackPolicy, ProviderKind, StoreKind};
use crate::store::{FileStore, MemoryStore, SessionStore, ATTEMPTS_KEY, SESSION_KEY};
use crate::Result;

/// Errors from coordinator-only operations.
#[derive(Error, Debug)]
pub enum AdminError {
    /// Caller is not allowed.
    #[error(transparent)]
    Permission(#[from] PermissionError),

    /// Proposed secret does not meet the rules.
    #[error(transparent)]
    Password(#[from] PasswordError),

    /// Identity provider refused or failed.
    #[error(transparent)]
    Verifier(#[from] VerifyError),

    /// Audit log could not be read.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Throttling and lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Consecutive failures before lockout.
    pub max_attempts: u32,
    /// Lockout window in seconds.
    pub lockout_secs: u64,
    /// Idle timeout in seconds.
    pub session_timeout_secs: u64,
    /// When the secondary verifier may answer.
    pub fallback: FallbackPolicy,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_LOGIN_ATTEMPTS,
            lockout_secs: LOCKOUT_DURATION_SECS,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            fallback: FallbackPolicy::OnUnavailable,
        }
    }
}

impl GuardPolicy {
    /// Policy from the `[auth]` section and the provider's fallback setting.
    pub fn from_config(auth: &AuthConfig, fallback: FallbackPolicy) -> Self {
        Self {
            max_attempts: auth.max_login_attempts,
            lockout_secs: auth.lockout_secs,
            session_timeout_secs: auth.session_timeout_secs,
            fallback,
        }
    }

    fn session_timeout_ms(&self) -> i64 {
        i64::try_from(self.session_timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// Builder for [`AuthGuard`].
pub struct AuthGuardBuilder {
    primary: Arc<dyn CredentialVerifier>,
    secondary: Option<Arc<dyn CredentialVerifier>>,
    store: Option<Arc<dyn SessionStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
    policy: GuardPolicy,
}

impl AuthGuardBuilder {
    /// Verifier consulted once when the primary is unavailable.
    pub fn fallback(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.secondary = Some(verifier);
        self
    }

    /// Session store (default: in-memory).
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Audit sink (default: tracing).
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Time source (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Throttling and lifetime policy.
    pub fn policy(mut self, policy: GuardPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the guard, restoring attempt counters from the store.
    pub fn build(self) -> AuthGuard {
        let mut guard = AuthGuard {
            primary: self.primary,
            secondary: self.secondary,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            limiter: LoginLimiter::with_config(self.policy.max_attempts, self.policy.lockout_secs),
            policy: self.policy,
            current: None,
            cache_loaded: false,
            state: GuardState::Anonymous,
        };
        guard.restore_counters();
        guard
    }
}

/// Throttled, role-aware gate in front of the application.
pub struct AuthGuard {
    primary: Arc<dyn CredentialVerifier>,
    secondary: Option<Arc<dyn CredentialVerifier>>,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: GuardPolicy,
    limiter: LoginLimiter,
    current: Option<Session>,
    cache_loaded: bool,
    state: GuardState,
}

impl AuthGuard {
    /// Start building a guard around a primary verifier.
    pub fn builder(primary: Arc<dyn CredentialVerifier>) -> AuthGuardBuilder {
        AuthGuardBuilder {
            primary,
            secondary: None,
            store: None,
            audit: None,
            clock: None,
            policy: GuardPolicy::default(),
        }
    }

    /// Wire a guard from configuration.
    ///
    /// Exactly one primary verifier is chosen by `provider.kind`. With a
    /// remote primary, the local table is attached as the secondary only when
    /// `provider.fallback` allows it.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let local = if config.local_users.is_empty() {
            LocalTable::seeded()
        } else {
            LocalTable::from_config(&config.local_users)?
        };

        let store: Arc<dyn SessionStore> = match config.store.kind {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::File => Arc::new(FileStore::open(&config.store.path)?),
        };

        let audit: Arc<dyn AuditSink> = if config.audit.persist {
            Arc::new(
                FanoutAuditSink::new()
                    .with(Arc::new(StoreAuditSink::with_capacity(
                        store.clone(),
                        config.audit.max_entries,
                    )))
                    .with(Arc::new(TracingAuditSink)),
            )
        } else {
            Arc::new(TracingAuditSink)
        };

        let policy = GuardPolicy::from_config(&config.auth, config.provider.fallback);
        let builder = match config.provider.kind {
            ProviderKind::Local => Self::builder(Arc::new(local)),
            ProviderKind::Remote => {
                let remote = RemoteVerifier::from_config(&config.provider)?;
                let builder = Self::builder(Arc::new(remote));
                match config.provider.fallback {
                    FallbackPolicy::OnUnavailable => builder.fallback(Arc::new(local)),
                    FallbackPolicy::Never => builder,
                }
            }
        };

        info!(
            provider = ?config.provider.kind,
            fallback = ?config.provider.fallback,
            store = ?config.store.kind,
            "Auth guard configured"
        );

        Ok(builder.store(store).audit(audit).policy(policy).build())
    }

    /// Attempt to log in.
    ///
    /// A locked key fails with [`AuthError::Locked`] without consulting any
    /// verifier. Wrong credentials, and verifiers that cannot answer at all,
    /// fail with [`AuthError::InvalidCredentials`].
    pub async fn attempt_login(&mut self, key: &str, secret: &str) -> std::result::Result<Session, AuthError> {
        let key = normalize_key(key);
        let started = self.clock.now();

        match self.limiter.check(&key, started) {
            LimitResult::Locked(remaining) => {
                warn!(
                    key = %key,
                    remaining_secs = remaining,
                    "Login attempt blocked: key locked"
                );
                self.emit(
                    AuditEvent::new(AuditEventType::LoginFailed, started)
                        .key(&key)
                        .attempts(self.limiter.attempt_count(&key))
                        .reason("locked"),
                );
                return Err(AuthError::Locked(remaining));
            }
            LimitResult::Reset | LimitResult::Allowed => {}
        }

        // The failure is written back before the verifier is awaited, so an
        // abandoned attempt still counts. Success undoes it below.
        let snapshot = self.limiter.counter(&key).copied();
        let count = self.limiter.record_failure(&key, started);
        self.limiter.cleanup(started);
        self.persist_counters();

        self.state = GuardState::Authenticating;
        let outcome = self.verify_with_fallback(&key, secret).await;
        let now = self.clock.now();

        match outcome {
            Ok((principal, provider, fallback_used)) => {
                let session = Session::new(principal, provider, now);
                if let Err(e) = self.persist_session(&session) {
                    self.limiter.restore(&key, snapshot);
                    self.persist_counters();
                    self.settle_state();
                    return Err(e);
                }
                self.limiter.clear(&key);
                self.persist_counters();

                info!(
                    key = %key,
                    role = %session.role,
                    provider = %provider,
                    fallback_used,
                    "Login successful"
                );
                self.emit(
                    AuditEvent::new(AuditEventType::LoginSuccess, now)
                        .key(&key)
                        .role(session.role)
                        .provider(provider)
                        .fallback_used(fallback_used)
                        .session_id(&session.token),
                );

                self.current = Some(session.clone());
                self.cache_loaded = true;
                self.state = GuardState::Authenticated;
                Ok(session)
            }
            Err(err) => {
                let remaining = self.limiter.remaining_attempts(count);

                let reason = match &err {
                    VerifyError::Rejected => "invalid_credentials",
                    VerifyError::Unavailable(_) => "verifier_unavailable",
                    VerifyError::Unsupported(_) => "unsupported",
                };
                warn!(key = %key, attempts = count, reason, "Login failed");
                self.emit(
                    AuditEvent::new(AuditEventType::LoginFailed, now)
                        .key(&key)
                        .attempts(count)
                        .reason(reason),
                );

                self.settle_state();
                Err(AuthError::InvalidCredentials(remaining))
            }
        }
    }

    /// Check the persisted session and record activity.
    ///
    /// Returns false, destroying the session, once it has been idle for
    /// longer than the timeout. Unreadable sessions are discarded.
    pub fn check_session(&mut self) -> bool {
        let now = self.clock.now();

        let raw = match self.store.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.forget_session(GuardState::Anonymous);
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Session store unreadable, treating as anonymous");
                self.current = None;
                self.cache_loaded = true;
                self.settle_state();
                return false;
            }
        };

        let mut session = match Session::from_json(&raw) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Discarding malformed session");
                self.remove_persisted_session();
                self.forget_session(GuardState::Anonymous);
                return false;
            }
        };

        if session.is_idle(now, self.policy.session_timeout_ms()) {
            info!(key = %session.key, "Session expired by inactivity");
            self.emit(
                AuditEvent::new(AuditEventType::SessionExpired, now)
                    .key(&session.key)
                    .role(session.role)
                    .provider(session.provider)
                    .duration_ms(session.duration_ms(now))
                    .session_id(&session.token),
            );
            self.remove_persisted_session();
            self.forget_session(GuardState::Expired);
            return false;
        }

        session.touch(now);
        if let Err(e) = self.persist_session(&session) {
            warn!(error = %e, "Failed to persist session activity");
        }
        self.current = Some(session);
        self.cache_loaded = true;
        self.state = GuardState::Authenticated;
        true
    }

    /// The current session, read from the store on first use.
    pub fn current_principal(&mut self) -> Option<&Session> {
        if !self.cache_loaded {
            self.cache_loaded = true;
            self.current = match self.store.get(SESSION_KEY) {
                Ok(Some(raw)) => match Session::from_json(&raw) {
                    Ok(session) => Some(session),
                    Err(e) => {
                        debug!(error = %e, "Stored session unreadable");
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "Session store unreadable");
                    None
                }
            };
            if self.current.is_some() {
                self.state = GuardState::Authenticated;
            }
        }
        if self.state == GuardState::Authenticating {
            // A login future was dropped mid-flight.
            self.settle_state();
        }
        self.current.as_ref()
    }

    /// The live session, or why there is none.
    ///
    /// Runs [`check_session`](Self::check_session) first, so activity is
    /// recorded and an idle session is expired on the spot.
    pub fn require_session(&mut self) -> std::result::Result<&Session, AuthError> {
        if !self.check_session() {
            return Err(match self.state {
                GuardState::Expired => AuthError::SessionExpired,
                _ => AuthError::NotAuthenticated,
            });
        }
        self.current.as_ref().ok_or(AuthError::NotAuthenticated)
    }

    /// End the session.
    ///
    /// Local state is cleared first; a failing remote sign-out is only
    /// logged.
    pub async fn logout(&mut self) {
        let now = self.clock.now();
        let session = self.current_principal().cloned();

        self.remove_persisted_session();
        self.current = None;
        self.cache_loaded = true;

        let Some(session) = session else {
            self.state = GuardState::Anonymous;
            return;
        };
        self.state = GuardState::LoggedOut;

        let duration_ms = session.duration_ms(now);
        info!(key = %session.key, duration_ms, "Session logged out");
        self.emit(
            AuditEvent::new(AuditEventType::Logout, now)
                .key(&session.key)
                .role(session.role)
                .provider(session.provider)
                .duration_ms(duration_ms)
                .session_id(&session.token),
        );

        if let Some(verifier) = self.verifier_for(session.provider) {
            if let Err(e) = verifier.sign_out().await {
                warn!(error = %e, provider = %session.provider, "Remote sign-out failed");
            }
        }
    }

    /// Whether the current principal holds a capability.
    pub fn has_permission(&mut self, capability: &str) -> bool {
        permission::has_permission(self.current_principal(), capability)
    }

    /// Whether the current principal's role may open a resource.
    pub fn can_access_resource(&mut self, resource: &str) -> bool {
        permission::can_access_resource(self.current_principal(), resource)
    }

    /// Like [`has_permission`](Self::has_permission), auditing denials.
    pub fn require_permission(&mut self, capability: &str) -> std::result::Result<(), PermissionError> {
        let result = permission::check_permission(self.current_principal(), capability);
        if let Err(e) = &result {
            self.audit_denial(capability, e);
        }
        result
    }

    /// Like [`can_access_resource`](Self::can_access_resource), auditing denials.
    pub fn require_resource(&mut self, resource: &str) -> std::result::Result<(), PermissionError> {
        let result = permission::check_resource(self.current_principal(), resource);
        if let Err(e) = &result {
            self.audit_denial(resource, e);
        }
        result
    }

    /// Ask the primary provider to send a password reset message.
    pub async fn request_password_reset(&mut self, email: &str) -> std::result::Result<(), VerifyError> {
        let email = normalize_key(email);
        let result = self.primary.request_password_reset(&email).await;
        let now = self.clock.now();

        match &result {
            Ok(()) => {
                info!(key = %email, "Password reset requested");
                self.emit(
                    AuditEvent::new(AuditEventType::PasswordResetRequested, now)
                        .key(&email)
                        .provider(self.primary.provider()),
                );
            }
            Err(e) => {
                warn!(key = %email, error = %e, "Password reset failed");
                self.emit(
                    AuditEvent::new(AuditEventType::PasswordResetFailed, now)
                        .key(&email)
                        .provider(self.primary.provider())
                        .reason(&e.to_string()),
                );
            }
        }
        result
    }

    /// Register a new principal with the primary provider. Coordinators only.
    pub async fn create_principal(&mut self, new: NewPrincipal) -> std::result::Result<Principal, AdminError> {
        if let Err(e) = permission::require_coordinator(self.current_principal()) {
            self.audit_denial("create_principal", &e);
            return Err(e.into());
        }
        validate_password(&new.secret)?;

        let principal = self.primary.create_principal(&new).await?;
        let now = self.clock.now();
        info!(key = %principal.key, role = %principal.role, "Principal created");
        self.emit(
            AuditEvent::new(AuditEventType::PrincipalCreated, now)
                .key(&principal.key)
                .role(principal.role)
                .provider(self.primary.provider()),
        );
        Ok(principal)
    }

    /// Read back the security log. Coordinators only.
    pub fn security_logs(&mut self, filter: &AuditFilter) -> std::result::Result<Vec<AuditEvent>, AdminError> {
        if let Err(e) = permission::require_coordinator(self.current_principal()) {
            self.audit_denial("security_logs", &e);
            return Err(e.into());
        }
        Ok(self.audit.query(filter)?)
    }

    /// Failed attempts currently counted for a key. Counters whose lockout
    /// window has elapsed read as zero.
    pub fn attempt_count(&self, key: &str) -> u32 {
        self.limiter.active_count(key, self.clock.now())
    }

    /// Where the session slot is in its lifecycle.
    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Active policy.
    pub fn policy(&self) -> GuardPolicy {
        self.policy
    }

    async fn verify_with_fallback(
        &self,
        key: &str,
        secret: &str,
    ) -> std::result::Result<(Principal, Provider, bool), VerifyError> {
        let reason = match self.primary.verify(key, secret).await {
            Ok(principal) => return Ok((principal, self.primary.provider(), false)),
            Err(VerifyError::Unavailable(reason)) => reason,
            Err(e) => return Err(e),
        };

        let secondary = match (&self.secondary, self.policy.fallback) {
            (Some(secondary), FallbackPolicy::OnUnavailable) => secondary,
            _ => {
                warn!(key = %key, reason = %reason, "Primary verifier unavailable, no fallback");
                return Err(VerifyError::Unavailable(reason));
            }
        };

        warn!(
            key = %key,
            reason = %reason,
            fallback = %secondary.provider(),
            "Primary verifier unavailable, trying fallback"
        );
        let principal = secondary.verify(key, secret).await?;
        Ok((principal, secondary.provider(), true))
    }

    fn verifier_for(&self, provider: Provider) -> Option<&Arc<dyn CredentialVerifier>> {
        std::iter::once(&self.primary)
            .chain(self.secondary.iter())
            .find(|v| v.provider() == provider)
    }

    fn persist_session(&self, session: &Session) -> std::result::Result<(), AuthError> {
        let raw = session.to_json()?;
        self.store
            .set(SESSION_KEY, &raw)
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    fn remove_persisted_session(&self) {
        if let Err(e) = self.store.remove(SESSION_KEY) {
            warn!(error = %e, "Failed to remove persisted session");
        }
    }

    fn forget_session(&mut self, next: GuardState) {
        let had_session = self.current.is_some() || self.state.is_authenticated();
        self.current = None;
        self.cache_loaded = true;
        self.state = match (next, had_session) {
            (GuardState::Anonymous, false) if self.state != GuardState::Authenticating => self.state,
            (next, _) => next,
        };
    }

    /// Resolve the state after a flow that did not open a new session.
    fn settle_state(&mut self) {
        self.state = if self.current.is_some() {
            GuardState::Authenticated
        } else {
            GuardState::Anonymous
        };
    }

    fn restore_counters(&mut self) {
        let raw = match self.store.get(ATTEMPTS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Login attempt counters unreadable");
                return;
            }
        };
        match LoginLimiter::parse_counters(&raw) {
            Ok(counters) => {
                self.limiter.load(counters);
                if self.limiter.cleanup(self.clock.now()) > 0 {
                    self.persist_counters();
                }
            }
            Err(e) => {
                warn!(error = %e, "Discarding malformed login attempt counters");
                self.persist_counters();
            }
        }
    }

    fn persist_counters(&self) {
        match self.limiter.to_json() {
            Ok(raw) => {
                if let Err(e) = self.store.set(ATTEMPTS_KEY, &raw) {
                    warn!(error = %e, "Failed to persist login attempt counters");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode login attempt counters"),
        }
    }

    fn audit_denial(&self, target: &str, error: &PermissionError) {
        let now = self.clock.now();
        let mut event = AuditEvent::new(AuditEventType::UnauthorizedAccess, now)
            .reason(&format!("{target}: {error}"));
        if let Some(session) = &self.current {
            event = event
                .key(&session.key)
                .role(session.role)
                .session_id(&session.token);
        }
        self.emit(event);
    }

    fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(&event) {
            warn!(error = %e, event = %event.event_type, "Failed to record security event");
        }
    }
}
