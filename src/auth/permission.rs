//! Permission checking.
//!
//! Role-based access control over an optional session: coordinators are
//! unrestricted, other roles are checked against their capability tags or
//! the static resource table.

use thiserror::Error;

use super::role::Role;
use super::session::Session;

/// Permission-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    /// Session lacks the capability.
    #[error("permission '{0}' is required")]
    MissingCapability(String),

    /// Role may not open the resource.
    #[error("access to '{0}' is not allowed")]
    ResourceDenied(String),

    /// Operation needs a specific role.
    #[error("this operation requires the {0} role")]
    InsufficientRole(String),

    /// No session.
    #[error("login required")]
    NotAuthenticated,
}

/// Check a capability tag against a session.
///
/// # Examples
///
/// ```
/// use clinic_guard::auth::permission::has_permission;
///
/// assert!(!has_permission(None, "clients"));
/// ```
pub fn has_permission(session: Option<&Session>, capability: &str) -> bool {
    match session {
        None => false,
        Some(s) => match s.role {
            Role::Coordinator => true,
            Role::Staff | Role::Intern => s.permissions.contains(capability),
        },
    }
}

/// Check the static role/resource table against a session.
pub fn can_access_resource(session: Option<&Session>, resource: &str) -> bool {
    session.is_some_and(|s| s.role.can_access(resource))
}

/// Like [`has_permission`], with the reason for a denial.
pub fn check_permission(session: Option<&Session>, capability: &str) -> Result<(), PermissionError> {
    let session = session.ok_or(PermissionError::NotAuthenticated)?;
    if has_permission(Some(session), capability) {
        Ok(())
    } else {
        Err(PermissionError::MissingCapability(capability.to_string()))
    }
}

/// Like [`can_access_resource`], with the reason for a denial.
pub fn check_resource(session: Option<&Session>, resource: &str) -> Result<(), PermissionError> {
    let session = session.ok_or(PermissionError::NotAuthenticated)?;
    if session.role.can_access(resource) {
        Ok(())
    } else {
        Err(PermissionError::ResourceDenied(resource.to_string()))
    }
}

/// Require the coordinator role.
pub fn require_coordinator(session: Option<&Session>) -> Result<(), PermissionError> {
    let session = session.ok_or(PermissionError::NotAuthenticated)?;
    match session.role {
        Role::Coordinator => Ok(()),
        Role::Staff | Role::Intern => Err(PermissionError::InsufficientRole(
            Role::Coordinator.display_name().to_string(),
        )),
    }
}
