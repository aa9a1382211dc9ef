//! Remote identity service client.
//!
//! Speaks the password-grant flavour of a Supabase-compatible auth API.
//! Any answer other than a definitive rejection is reported as
//! [`VerifyError::Unavailable`] so the guard can decide whether to fall back.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::credential::{NewPrincipal, Principal};
use super::role::Role;
use super::session::Provider;
use super::verifier::{CredentialVerifier, VerifyError};
use crate::config::ProviderConfig;
use crate::error::{GuardError, Result};

/// User agent sent with every request.
const USER_AGENT: &str = "clinic-guard/0.1";

/// Permissions granted when the provider stores none.
const FALLBACK_PERMISSIONS: &[&str] = &["schedule"];

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RecoverRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct SignupRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: SignupMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct SignupMetadata<'a> {
    name: &'a str,
    role: &'a str,
    permissions: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: RemoteUser,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    permissions: Option<Vec<String>>,
}

/// Turn a provider user record into a principal.
///
/// Missing metadata gets the least-privileged defaults. A role the guard does
/// not know is an error, never a silent downgrade or upgrade.
fn principal_from_user(user: RemoteUser, key: &str) -> std::result::Result<Principal, VerifyError> {
    let meta = user.user_metadata;
    let role = match meta.role.as_deref() {
        None => Role::Intern,
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|e| VerifyError::Unavailable(format!("provider returned {e}")))?,
    };
    let permissions: BTreeSet<String> = match meta.permissions {
        Some(p) => p.into_iter().collect(),
        None => FALLBACK_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
    };
    let email = user.email.unwrap_or_else(|| key.to_string());

    Ok(Principal {
        id: user.id,
        key: key.to_string(),
        display_name: meta.name.unwrap_or_else(|| email.clone()),
        role,
        permissions,
    })
}

/// Extract the user record from a signup response.
///
/// Depending on whether confirmation is required, the provider answers with
/// either `{ "user": {...}, "session": ... }` or the bare user object.
fn signup_user(body: serde_json::Value) -> std::result::Result<RemoteUser, VerifyError> {
    let nested = body.get("user").filter(|u| !u.is_null()).cloned();
    let user = nested.unwrap_or(body);
    serde_json::from_value(user)
        .map_err(|e| VerifyError::Unavailable(format!("undecodable signup response: {e}")))
}

/// Map a non-success status to a verification outcome.
fn classify_status(status: StatusCode) -> VerifyError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            VerifyError::Rejected
        }
        other => VerifyError::Unavailable(format!("HTTP error: {other}")),
    }
}

fn transport(e: reqwest::Error) -> VerifyError {
    VerifyError::Unavailable(format!("request failed: {e}"))
}

/// Client for the remote identity service.
pub struct RemoteVerifier {
    client: Client,
    base_url: String,
    api_key: String,
    // Bearer token of the last successful login, used for sign-out.
    access_token: Mutex<Option<String>>,
}

impl RemoteVerifier {
    /// Create a client for `base_url`.
    pub fn new(base_url: &str, api_key: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| GuardError::Config(format!("invalid provider url: {e}")))?;

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GuardError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: Mutex::new(None),
        })
    }

    /// Create a client from the `[provider]` section.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(
            &config.url,
            &config.api_key,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }
}

impl std::fmt::Debug for RemoteVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteVerifier")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialVerifier for RemoteVerifier {
    fn provider(&self) -> Provider {
        Provider::Remote
    }

    async fn verify(&self, key: &str, secret: &str) -> std::result::Result<Principal, VerifyError> {
        let response = self
            .client
            .post(self.endpoint("token?grant_type=password"))
            .header("apikey", &self.api_key)
            .json(&PasswordGrant {
                email: key,
                password: secret,
            })
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            debug!(key = %key, status = %status, "Remote sign-in refused");
            return Err(classify_status(status));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| VerifyError::Unavailable(format!("undecodable token response: {e}")))?;

        let principal = principal_from_user(body.user, key)?;
        *self.access_token.lock().await = Some(body.access_token);
        Ok(principal)
    }

    async fn sign_out(&self) -> std::result::Result<(), VerifyError> {
        let Some(token) = self.access_token.lock().await.take() else {
            debug!("No remote access token held, skipping remote sign-out");
            return Ok(());
        };

        let response = self
            .client
            .post(self.endpoint("logout"))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            warn!(status = %response.status(), "Remote sign-out refused");
            Err(VerifyError::Unavailable(format!(
                "HTTP error: {}",
                response.status()
            )))
        }
    }

    async fn request_password_reset(&self, email: &str) -> std::result::Result<(), VerifyError> {
        let response = self
            .client
            .post(self.endpoint("recover"))
            .header("apikey", &self.api_key)
            .json(&RecoverRequest { email })
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status()))
        }
    }

    async fn create_principal(
        &self,
        new: &NewPrincipal,
    ) -> std::result::Result<Principal, VerifyError> {
        let permissions = new.effective_permissions();
        let response = self
            .client
            .post(self.endpoint("signup"))
            .header("apikey", &self.api_key)
            .json(&SignupRequest {
                email: &new.key,
                password: &new.secret,
                data: SignupMetadata {
                    name: &new.display_name,
                    role: new.role.as_str(),
                    permissions: permissions.iter().map(String::as_str).collect(),
                },
            })
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VerifyError::Unavailable(format!("undecodable signup response: {e}")))?;
        principal_from_user(signup_user(body)?, &new.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(json: &str) -> RemoteUser {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_principal_full_metadata() {
        let u = user(
            r#"{"id":"uuid-1","email":"func@clinica.com",
                "user_metadata":{"name":"Dra. Maria","role":"staff","permissions":["clients","reports"]}}"#,
        );
        let p = principal_from_user(u, "func@clinica.com").unwrap();
        assert_eq!(p.id, "uuid-1");
        assert_eq!(p.display_name, "Dra. Maria");
        assert_eq!(p.role, Role::Staff);
        assert_eq!(p.permissions.len(), 2);
    }

    #[test]
    fn test_principal_defaults() {
        let u = user(r#"{"id":"uuid-2","email":"novo@clinica.com"}"#);
        let p = principal_from_user(u, "novo@clinica.com").unwrap();
        assert_eq!(p.role, Role::Intern);
        assert_eq!(p.display_name, "novo@clinica.com");
        assert!(p.permissions.contains("schedule"));
        assert_eq!(p.permissions.len(), 1);
    }

    #[test]
    fn test_principal_unknown_role() {
        let u = user(r#"{"id":"uuid-3","user_metadata":{"role":"superuser"}}"#);
        assert!(matches!(
            principal_from_user(u, "x@clinica.com"),
            Err(VerifyError::Unavailable(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), VerifyError::Rejected);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), VerifyError::Rejected);
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            VerifyError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            VerifyError::Unavailable(_)
        ));
    }

    #[test]
    fn test_signup_response_shapes() {
        let nested = serde_json::json!({"user": {"id": "a"}, "session": null});
        assert_eq!(signup_user(nested).unwrap().id, "a");

        let inline = serde_json::json!({"id": "b", "email": "b@x"});
        assert_eq!(signup_user(inline).unwrap().id, "b");

        let empty = serde_json::json!({"session": null});
        assert!(matches!(signup_user(empty), Err(VerifyError::Unavailable(_))));
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let result = RemoteVerifier::new(
            "not a url",
            "key",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(GuardError::Config(_))));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let v = RemoteVerifier::new(
            "https://clinic.example.org/",
            "key",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(v.endpoint("logout"), "https://clinic.example.org/auth/v1/logout");
    }

    #[tokio::test]
    async fn test_unreachable_is_unavailable() {
        // Nothing listens on the discard port locally.
        let v = RemoteVerifier::new(
            "http://127.0.0.1:9",
            "key",
            Duration::from_millis(500),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(matches!(
            v.verify("coord@clinica.com", "coord123").await,
            Err(VerifyError::Unavailable(_))
        ));
        assert!(matches!(
            v.request_password_reset("coord@clinica.com").await,
            Err(VerifyError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_out_without_login_is_noop() {
        let v = RemoteVerifier::new(
            "http://127.0.0.1:9",
            "key",
            Duration::from_millis(500),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(v.sign_out().await.is_ok());
    }
}
