//! Clinic roles and the resources they may open.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Staff role for permission management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Clinic coordinator; unrestricted.
    Coordinator,
    /// Clinical staff member.
    Staff,
    /// Intern with access limited to their own clients.
    #[default]
    Intern,
}

impl Role {
    /// Convert role to its stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coordinator => "coordinator",
            Role::Staff => "staff",
            Role::Intern => "intern",
        }
    }

    /// Get display name for the role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Coordinator => "Coordenador",
            Role::Staff => "Funcionário",
            Role::Intern => "Estagiário",
        }
    }

    /// Default capability tags for accounts of this role.
    pub fn default_permissions(&self) -> &'static [&'static str] {
        match self {
            Role::Coordinator => &["all"],
            Role::Staff => &["clients", "schedule", "reports"],
            Role::Intern => &["schedule", "my_clients"],
        }
    }

    /// Resources this role may open. `None` means unrestricted.
    pub fn resources(&self) -> Option<&'static [Resource]> {
        match self {
            Role::Coordinator => None,
            Role::Staff => Some(&[Resource::Clients, Resource::Schedule, Resource::Reports]),
            Role::Intern => Some(&[Resource::Schedule, Resource::MyClients]),
        }
    }

    /// Check whether this role may open the named resource.
    ///
    /// # Examples
    ///
    /// ```
    /// use clinic_guard::Role;
    ///
    /// assert!(Role::Staff.can_access("reports"));
    /// assert!(!Role::Intern.can_access("reports"));
    /// assert!(Role::Coordinator.can_access("anything"));
    /// ```
    pub fn can_access(&self, resource: &str) -> bool {
        match self.resources() {
            None => true,
            Some(allowed) => resource
                .parse::<Resource>()
                .map(|r| allowed.contains(&r))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" => Ok(Role::Coordinator),
            "staff" => Ok(Role::Staff),
            "intern" => Ok(Role::Intern),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// Application areas gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Full client/patient records.
    Clients,
    /// Appointment schedule.
    Schedule,
    /// Reports.
    Reports,
    /// Clients assigned to the current intern.
    MyClients,
    /// Stock/inventory.
    Stock,
    /// Financial notes.
    Financial,
    /// Intern management.
    Interns,
}

impl Resource {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Clients => "clients",
            Resource::Schedule => "schedule",
            Resource::Reports => "reports",
            Resource::MyClients => "my_clients",
            Resource::Stock => "stock",
            Resource::Financial => "financial",
            Resource::Interns => "interns",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clients" => Ok(Resource::Clients),
            "schedule" => Ok(Resource::Schedule),
            "reports" => Ok(Resource::Reports),
            "my_clients" => Ok(Resource::MyClients),
            "stock" => Ok(Resource::Stock),
            "financial" => Ok(Resource::Financial),
            "interns" => Ok(Resource::Interns),
            _ => Err(format!("unknown resource: {s}")),
        }
    }
}
