//! Credential verification.
//!
//! The guard talks to identity providers only through [`CredentialVerifier`].
//! A local static table and a remote identity service both implement it.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::credential::{normalize_key, CredentialRecord, NewPrincipal, Principal, Secret};
use super::role::Role;
use super::session::Provider;
use crate::config::LocalUserConfig;
use crate::error::{GuardError, Result};

/// Verification outcomes other than success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// The provider answered and the credentials are wrong.
    #[error("credentials rejected")]
    Rejected,

    /// The provider could not give an answer (transport, server, decoding).
    #[error("verifier unavailable: {0}")]
    Unavailable(String),

    /// The provider does not offer this operation.
    #[error("operation not supported by {0} provider")]
    Unsupported(&'static str),
}

/// An identity provider able to check a credential pair.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Which provider a session created from this verifier belongs to.
    fn provider(&self) -> Provider;

    /// Verify a normalized key and secret.
    async fn verify(&self, key: &str, secret: &str) -> std::result::Result<Principal, VerifyError>;

    /// End the provider-side session, if the provider keeps one.
    async fn sign_out(&self) -> std::result::Result<(), VerifyError> {
        Ok(())
    }

    /// Ask the provider to send a password reset message.
    async fn request_password_reset(&self, _email: &str) -> std::result::Result<(), VerifyError> {
        Err(VerifyError::Unsupported(self.provider().as_str()))
    }

    /// Register a new principal with the provider.
    async fn create_principal(
        &self,
        _new: &NewPrincipal,
    ) -> std::result::Result<Principal, VerifyError> {
        Err(VerifyError::Unsupported(self.provider().as_str()))
    }
}

/// Static credential table used when no remote provider is configured, or as
/// the fallback when the remote one is unreachable.
#[derive(Debug, Clone, Default)]
pub struct LocalTable {
    records: HashMap<String, CredentialRecord>,
}

impl LocalTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The clinic's built-in accounts, three per role.
    pub fn seeded() -> Self {
        let seed = [
            ("coord@clinica.com", "coord123", "Dr. Ana Silva", Role::Coordinator),
            ("coordenador", "123456", "Coordenador Principal", Role::Coordinator),
            ("admin@neuropsico.com", "admin2025", "Administrador Sistema", Role::Coordinator),
            ("func@clinica.com", "func123", "Dra. Maria Santos", Role::Staff),
            ("funcionario", "123456", "Funcionário 1", Role::Staff),
            ("staff@neuropsico.com", "staff2025", "Equipe Clínica", Role::Staff),
            ("estagiario", "123456", "João Oliveira", Role::Intern),
            ("intern@clinica.com", "intern123", "Estagiário Junior", Role::Intern),
            ("estagiario@neuropsico.com", "est2025", "Estagiário Sistema", Role::Intern),
        ];

        seed.into_iter()
            .map(|(key, secret, name, role)| {
                CredentialRecord::new(key, Secret::Plain(secret.to_string()), name, role)
            })
            .collect()
    }

    /// Build a table from `[[local_users]]` config entries.
    pub fn from_config(users: &[LocalUserConfig]) -> Result<Self> {
        let mut table = Self::new();
        for user in users {
            let secret = match (&user.secret, &user.secret_hash) {
                (_, Some(hash)) => Secret::Hashed(hash.clone()),
                (Some(plain), None) => Secret::Plain(plain.clone()),
                (None, None) => {
                    return Err(GuardError::Config(format!(
                        "local user {} has neither secret nor secret_hash",
                        user.key
                    )))
                }
            };
            let role: Role = user.role.parse().map_err(GuardError::Config)?;
            let name = user.name.clone().unwrap_or_else(|| user.key.clone());
            let mut record = CredentialRecord::new(&user.key, secret, &name, role)
                .with_active(user.active);
            if let Some(permissions) = &user.permissions {
                record = record.with_permissions(permissions.iter().cloned());
            }
            table.insert(record);
        }
        Ok(table)
    }

    /// Add or replace a record.
    pub fn insert(&mut self, record: CredentialRecord) {
        self.records.insert(record.key.clone(), record);
    }

    /// Look up a record by key.
    pub fn get(&self, key: &str) -> Option<&CredentialRecord> {
        self.records.get(&normalize_key(key))
    }

    /// Known keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.records.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<CredentialRecord> for LocalTable {
    fn from_iter<T: IntoIterator<Item = CredentialRecord>>(iter: T) -> Self {
        let mut table = Self::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}

#[async_trait]
impl CredentialVerifier for LocalTable {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    async fn verify(&self, key: &str, secret: &str) -> std::result::Result<Principal, VerifyError> {
        let Some(record) = self.get(key) else {
            debug!(key = %key, "Local lookup: unknown key");
            return Err(VerifyError::Rejected);
        };

        if !record.active {
            debug!(key = %key, "Local lookup: account inactive");
            return Err(VerifyError::Rejected);
        }

        if record.secret.matches(secret) {
            Ok(record.to_principal())
        } else {
            Err(VerifyError::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;

    #[tokio::test]
    async fn test_seeded_coordinator() {
        let table = LocalTable::seeded();
        assert_eq!(table.len(), 9);

        let principal = table.verify("coord@clinica.com", "coord123").await.unwrap();
        assert_eq!(principal.role, Role::Coordinator);
        assert_eq!(principal.display_name, "Dr. Ana Silva");
        assert!(principal.permissions.contains("all"));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let table = LocalTable::seeded();
        assert_eq!(
            table.verify("func@clinica.com", "wrongpass").await,
            Err(VerifyError::Rejected)
        );
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let table = LocalTable::seeded();
        assert_eq!(
            table.verify("nobody@clinica.com", "x").await,
            Err(VerifyError::Rejected)
        );
    }

    #[tokio::test]
    async fn test_inactive_rejected() {
        let table: LocalTable = [CredentialRecord::new(
            "old@clinica.com",
            Secret::Plain("pw".into()),
            "Old",
            Role::Staff,
        )
        .with_active(false)]
        .into_iter()
        .collect();

        assert_eq!(
            table.verify("old@clinica.com", "pw").await,
            Err(VerifyError::Rejected)
        );
    }

    #[tokio::test]
    async fn test_hashed_secret() {
        let hash = hash_password("hashed-secret").unwrap();
        let table: LocalTable = [CredentialRecord::new(
            "h@clinica.com",
            Secret::Hashed(hash),
            "Hashed",
            Role::Intern,
        )]
        .into_iter()
        .collect();

        assert!(table.verify("h@clinica.com", "hashed-secret").await.is_ok());
        assert_eq!(
            table.verify("h@clinica.com", "nope").await,
            Err(VerifyError::Rejected)
        );
    }

    #[tokio::test]
    async fn test_local_reset_unsupported() {
        let table = LocalTable::seeded();
        assert_eq!(
            table.request_password_reset("coord@clinica.com").await,
            Err(VerifyError::Unsupported("local"))
        );
        assert!(table.sign_out().await.is_ok());
    }

    #[test]
    fn test_from_config() {
        let users = vec![
            LocalUserConfig {
                key: "Reception@Clinica.com".into(),
                secret: Some("recep2025".into()),
                secret_hash: None,
                name: Some("Recepção".into()),
                role: "staff".into(),
                permissions: Some(vec!["schedule".into()]),
                active: true,
            },
            LocalUserConfig {
                key: "nosecret".into(),
                secret: None,
                secret_hash: None,
                name: None,
                role: "intern".into(),
                permissions: None,
                active: true,
            },
        ];

        assert!(matches!(
            LocalTable::from_config(&users),
            Err(GuardError::Config(_))
        ));

        let table = LocalTable::from_config(&users[..1]).unwrap();
        let record = table.get("reception@clinica.com").unwrap();
        assert_eq!(record.role, Role::Staff);
        assert_eq!(record.permissions.len(), 1);
        assert_eq!(table.keys(), vec!["reception@clinica.com"]);
    }

    #[test]
    fn test_from_config_bad_role() {
        let users = vec![LocalUserConfig {
            key: "x".into(),
            secret: Some("y".into()),
            secret_hash: None,
            name: None,
            role: "janitor".into(),
            permissions: None,
            active: true,
        }];
        assert!(matches!(
            LocalTable::from_config(&users),
            Err(GuardError::Config(_))
        ));
    }
}
