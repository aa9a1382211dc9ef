//! Clinic Guard - session and credential guard for a clinic back office.
//!
//! Throttles logins, keeps one persisted session alive until it goes idle,
//! and answers role-based permission questions.

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;

pub use audit::{
    AuditError, AuditEvent, AuditEventType, AuditFilter, AuditSink, FanoutAuditSink,
    MemoryAuditSink, StoreAuditSink, TracingAuditSink,
};
pub use auth::{
    normalize_key, AdminError, AuthError, AuthGuard, AuthGuardBuilder, CredentialVerifier,
    GuardPolicy, GuardState, LocalTable, NewPrincipal, PermissionError, Principal, Provider,
    RemoteVerifier, Resource, Role, Session, VerifyError,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, FallbackPolicy, ProviderKind, StoreKind};
pub use error::{GuardError, Result};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError};
