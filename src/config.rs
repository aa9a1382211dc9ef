//! Configuration module for clinic-guard.

use serde::Deserialize;
use std::path::Path;

use crate::auth::session::{
    DEFAULT_SESSION_TIMEOUT_SECS, LOCKOUT_DURATION_SECS, MAX_LOGIN_ATTEMPTS,
};
use crate::{GuardError, Result};

/// Environment variable overriding `provider.api_key`.
pub const API_KEY_ENV: &str = "CLINIC_GUARD_API_KEY";

/// Environment variable overriding `provider.url`.
pub const PROVIDER_URL_ENV: &str = "CLINIC_GUARD_PROVIDER_URL";

/// Login throttling and session lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Consecutive failures before lockout.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    /// Lockout window in seconds, measured from the last failure.
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
    /// Idle timeout in seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

fn default_max_login_attempts() -> u32 {
    MAX_LOGIN_ATTEMPTS
}

fn default_lockout_secs() -> u64 {
    LOCKOUT_DURATION_SECS
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: default_max_login_attempts(),
            lockout_secs: default_lockout_secs(),
            session_timeout_secs: default_session_timeout(),
        }
    }
}

/// Which identity provider is primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local credential table only.
    #[default]
    Local,
    /// Remote identity service, optionally backed by the local table.
    Remote,
}

/// When the secondary verifier may answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Never consult the secondary verifier.
    Never,
    /// Consult it once when the primary cannot answer. A definitive
    /// rejection from the primary is never re-checked.
    #[default]
    OnUnavailable,
}

/// Identity provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Primary provider.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the remote identity service.
    #[serde(default)]
    pub url: String,
    /// Public API key sent with every remote request.
    #[serde(default)]
    pub api_key: String,
    /// Secondary verifier policy (remote only).
    #[serde(default)]
    pub fallback: FallbackPolicy,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            url: String::new(),
            api_key: String::new(),
            fallback: FallbackPolicy::default(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Session store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Lost when the process exits.
    #[default]
    Memory,
    /// JSON files under `store.path`.
    File,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend.
    #[serde(default)]
    pub kind: StoreKind,
    /// Directory for the file backend.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/session".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

/// Security audit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Keep a readable copy of the log in the session store.
    #[serde(default = "default_audit_persist")]
    pub persist: bool,
    /// Maximum retained entries.
    #[serde(default = "default_audit_max_entries")]
    pub max_entries: usize,
}

fn default_audit_persist() -> bool {
    true
}

fn default_audit_max_entries() -> usize {
    crate::audit::DEFAULT_MAX_ENTRIES
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            persist: default_audit_persist(),
            max_entries: default_audit_max_entries(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/clinic-guard.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// A `[[local_users]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalUserConfig {
    /// Username or email.
    pub key: String,
    /// Plain secret.
    #[serde(default)]
    pub secret: Option<String>,
    /// Argon2id PHC hash; takes precedence over `secret`.
    #[serde(default)]
    pub secret_hash: Option<String>,
    /// Display name; defaults to the key.
    #[serde(default)]
    pub name: Option<String>,
    /// coordinator, staff or intern.
    pub role: String,
    /// Capability tags; defaults to the role's.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    /// Inactive accounts never authenticate.
    #[serde(default = "default_user_active")]
    pub active: bool,
}

fn default_user_active() -> bool {
    true
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Throttling and session lifetime.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Identity provider.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Session store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Security audit.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Local accounts. Empty means the built-in clinic accounts.
    #[serde(default)]
    pub local_users: Vec<LocalUserConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(GuardError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| GuardError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CLINIC_GUARD_API_KEY`: remote provider API key
    /// - `CLINIC_GUARD_PROVIDER_URL`: remote provider base URL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            if !api_key.is_empty() {
                self.provider.api_key = api_key;
            }
        }
        if let Ok(url) = std::env::var(PROVIDER_URL_ENV) {
            if !url.is_empty() {
                self.provider.url = url;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.auth.max_login_attempts == 0 {
            return Err(GuardError::Config(
                "auth.max_login_attempts must be at least 1".to_string(),
            ));
        }
        if self.auth.lockout_secs == 0 {
            return Err(GuardError::Config(
                "auth.lockout_secs must be positive".to_string(),
            ));
        }
        if self.auth.session_timeout_secs == 0 {
            return Err(GuardError::Config(
                "auth.session_timeout_secs must be positive".to_string(),
            ));
        }
        if self.provider.kind == ProviderKind::Remote {
            if self.provider.url.is_empty() || self.provider.api_key.is_empty() {
                return Err(GuardError::Config(format!(
                    "remote provider needs provider.url and provider.api_key \
                     (or {PROVIDER_URL_ENV} / {API_KEY_ENV})"
                )));
            }
            url::Url::parse(&self.provider.url)
                .map_err(|e| GuardError::Config(format!("invalid provider.url: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.auth.max_login_attempts, 5);
        assert_eq!(config.auth.lockout_secs, 900);
        assert_eq!(config.auth.session_timeout_secs, 86_400);

        assert_eq!(config.provider.kind, ProviderKind::Local);
        assert_eq!(config.provider.fallback, FallbackPolicy::OnUnavailable);
        assert!(config.provider.url.is_empty());
        assert_eq!(config.provider.connect_timeout_secs, 5);
        assert_eq!(config.provider.request_timeout_secs, 15);

        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.store.path, "data/session");

        assert!(config.audit.persist);
        assert_eq!(config.audit.max_entries, 1000);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/clinic-guard.log");

        assert!(config.local_users.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[auth]
max_login_attempts = 3
lockout_secs = 600
session_timeout_secs = 3600

[provider]
kind = "remote"
url = "https://clinic.example.org"
api_key = "anon-key"
fallback = "never"
connect_timeout_secs = 2
request_timeout_secs = 8

[store]
kind = "file"
path = "custom/session"

[audit]
persist = false
max_entries = 50

[logging]
level = "debug"
file = "custom/logs/guard.log"

[[local_users]]
key = "recepcao@clinica.com"
secret = "recep2025"
name = "Recepção"
role = "staff"
permissions = ["schedule"]

[[local_users]]
key = "antigo"
secret_hash = "$argon2id$v=19$m=65536,t=3,p=4$c2FsdA$aGFzaA"
role = "intern"
active = false
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.auth.max_login_attempts, 3);
        assert_eq!(config.auth.lockout_secs, 600);
        assert_eq!(config.auth.session_timeout_secs, 3600);

        assert_eq!(config.provider.kind, ProviderKind::Remote);
        assert_eq!(config.provider.url, "https://clinic.example.org");
        assert_eq!(config.provider.api_key, "anon-key");
        assert_eq!(config.provider.fallback, FallbackPolicy::Never);
        assert_eq!(config.provider.connect_timeout_secs, 2);
        assert_eq!(config.provider.request_timeout_secs, 8);

        assert_eq!(config.store.kind, StoreKind::File);
        assert_eq!(config.store.path, "custom/session");

        assert!(!config.audit.persist);
        assert_eq!(config.audit.max_entries, 50);

        assert_eq!(config.logging.level, "debug");

        assert_eq!(config.local_users.len(), 2);
        assert_eq!(config.local_users[0].name.as_deref(), Some("Recepção"));
        assert!(config.local_users[0].active);
        assert!(config.local_users[1].secret.is_none());
        assert!(!config.local_users[1].active);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[auth]
lockout_secs = 60
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.auth.lockout_secs, 60);
        assert_eq!(config.auth.max_login_attempts, 5);
        assert_eq!(config.provider.kind, ProviderKind::Local);
        assert_eq!(config.store.path, "data/session");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.auth.max_login_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");
        match result {
            Err(GuardError::Config(msg)) => assert!(msg.contains("config parse error")),
            _ => panic!("Expected Config error"),
        }
    }

    #[test]
    fn test_parse_unknown_provider_kind() {
        let result = Config::parse("[provider]\nkind = \"firebase\"\n");
        assert!(matches!(result, Err(GuardError::Config(_))));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(GuardError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinic-guard.toml");
        std::fs::write(&path, "[auth]\nmax_login_attempts = 7\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.auth.max_login_attempts, 7);
    }

    #[test]
    fn test_apply_env_overrides() {
        let original_key = std::env::var(API_KEY_ENV).ok();
        let original_url = std::env::var(PROVIDER_URL_ENV).ok();

        std::env::set_var(API_KEY_ENV, "env-key");
        std::env::set_var(PROVIDER_URL_ENV, "");

        let mut config = Config::default();
        config.provider.url = "https://kept.example.org".into();
        config.apply_env_overrides();

        assert_eq!(config.provider.api_key, "env-key");
        // Empty values never override
        assert_eq!(config.provider.url, "https://kept.example.org");

        match original_key {
            Some(val) => std::env::set_var(API_KEY_ENV, val),
            None => std::env::remove_var(API_KEY_ENV),
        }
        match original_url {
            Some(val) => std::env::set_var(PROVIDER_URL_ENV, val),
            None => std::env::remove_var(PROVIDER_URL_ENV),
        }
    }

    #[test]
    fn test_validate_remote_requires_url_and_key() {
        let mut config = Config::default();
        config.provider.kind = ProviderKind::Remote;
        assert!(config.validate().is_err());

        config.provider.url = "not a url".into();
        config.provider.api_key = "k".into();
        assert!(config.validate().is_err());

        config.provider.url = "https://clinic.example.org".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.auth.max_login_attempts = 0;
        assert!(matches!(config.validate(), Err(GuardError::Config(_))));
    }

    #[test]
    fn test_validate_zero_lockout() {
        let config = Config::parse(
            r#"
[auth]
lockout_secs = 0
"#,
        )
        .unwrap();
        match config.validate() {
            Err(GuardError::Config(msg)) => assert!(msg.contains("lockout_secs")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
