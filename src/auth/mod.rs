//! Authentication and authorization.
//!
//! This module provides credential verification, login throttling, session
//! lifecycle and role-based permission checks, all fronted by [`AuthGuard`].

pub mod credential;
pub mod guard;
pub mod limiter;
pub mod password;
pub mod permission;
pub mod remote;
pub mod role;
pub mod session;
pub mod verifier;

pub use credential::{normalize_key, CredentialRecord, NewPrincipal, Principal, Secret};
pub use guard::{AdminError, AuthGuard, AuthGuardBuilder, GuardPolicy};
pub use limiter::{AttemptCounter, LimitResult, LoginLimiter};
pub use password::{hash_password, validate_password, verify_password, PasswordError};
pub use permission::PermissionError;
pub use remote::RemoteVerifier;
pub use role::{Resource, Role};
pub use session::{
    AuthError, GuardState, Provider, Session, DEFAULT_SESSION_TIMEOUT_SECS,
    LOCKOUT_DURATION_SECS, MAX_LOGIN_ATTEMPTS,
};
pub use verifier::{CredentialVerifier, LocalTable, VerifyError};
