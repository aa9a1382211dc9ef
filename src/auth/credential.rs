//! Credential records and authenticated principals.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::password::{plain_secret_matches, verify_password};
use super::role::Role;

/// Normalize a credential key (username or email) before any lookup.
///
/// # Examples
///
/// ```
/// use clinic_guard::auth::normalize_key;
///
/// assert_eq!(normalize_key("  Coord@Clinica.com "), "coord@clinica.com");
/// ```
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Stored secret for a local account.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// Seeded plain secret.
    Plain(String),
    /// Argon2id PHC hash.
    Hashed(String),
}

impl Secret {
    /// Check a candidate secret against this one.
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Secret::Plain(stored) => plain_secret_matches(candidate, stored),
            Secret::Hashed(hash) => verify_password(candidate, hash).is_ok(),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Plain(_) => f.write_str("Secret::Plain(<redacted>)"),
            Secret::Hashed(_) => f.write_str("Secret::Hashed(<redacted>)"),
        }
    }
}

/// One principal known to a local credential table.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    /// Normalized username or email.
    pub key: String,
    /// Stored secret.
    pub secret: Secret,
    /// Name shown in the UI.
    pub display_name: String,
    /// Role.
    pub role: Role,
    /// Capability tags.
    pub permissions: BTreeSet<String>,
    /// Inactive accounts never authenticate.
    pub active: bool,
}

impl CredentialRecord {
    /// Create an active record with the role's default permissions.
    pub fn new(key: &str, secret: Secret, display_name: &str, role: Role) -> Self {
        Self {
            key: normalize_key(key),
            secret,
            display_name: display_name.to_string(),
            role,
            permissions: role
                .default_permissions()
                .iter()
                .map(|p| p.to_string())
                .collect(),
            active: true,
        }
    }

    /// Replace the permission set.
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the record active or inactive.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Principal view of this record.
    pub fn to_principal(&self) -> Principal {
        Principal {
            id: self.key.clone(),
            key: self.key.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            permissions: self.permissions.clone(),
        }
    }
}

/// An authenticated identity, as returned by a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Provider-side identifier (local key or remote user id).
    pub id: String,
    /// Normalized key used to log in.
    pub key: String,
    /// Name shown in the UI.
    pub display_name: String,
    /// Role.
    pub role: Role,
    /// Capability tags.
    pub permissions: BTreeSet<String>,
}

/// Request to create a new principal in an identity provider.
#[derive(Clone)]
pub struct NewPrincipal {
    /// Login email.
    pub key: String,
    /// Initial secret.
    pub secret: String,
    /// Name shown in the UI.
    pub display_name: String,
    /// Role.
    pub role: Role,
    /// Capability tags; empty means the role defaults.
    pub permissions: BTreeSet<String>,
}

impl NewPrincipal {
    /// Build a request using the role's default permissions.
    pub fn new(key: &str, secret: &str, display_name: &str, role: Role) -> Self {
        Self {
            key: normalize_key(key),
            secret: secret.to_string(),
            display_name: display_name.to_string(),
            role,
            permissions: BTreeSet::new(),
        }
    }

    /// Effective permissions for the request.
    pub fn effective_permissions(&self) -> BTreeSet<String> {
        if self.permissions.is_empty() {
            self.role
                .default_permissions()
                .iter()
                .map(|p| p.to_string())
                .collect()
        } else {
            self.permissions.clone()
        }
    }
}

impl fmt::Debug for NewPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewPrincipal")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .field("permissions", &self.permissions)
            .finish()
    }
}
