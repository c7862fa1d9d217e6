//! Account roles and the authorization rules attached to them.
//!
//! Roles are a closed set; every permission check goes through
//! [`authorize`] instead of comparing role strings at call sites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AccessDenied, ParseEnumError};

/// Account role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    #[default]
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "Administrateur",
            Role::Manager => "Gestionnaire",
        }
    }

    /// Whether this role may perform `action`.
    pub fn can(&self, action: Action) -> bool {
        match action {
            Action::ViewDashboard | Action::ManageCatalog => true,
            Action::ManageUsers => matches!(self, Role::Admin),
        }
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "MANAGER" => Ok(Role::Manager),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a signed-in account may try to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Open the back-office dashboard.
    ViewDashboard,
    /// Create, edit, reorder or delete groups, colors and images.
    ManageCatalog,
    /// List, create, edit or delete user accounts.
    ManageUsers,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::ViewDashboard => "view the dashboard",
            Action::ManageCatalog => "manage the catalog",
            Action::ManageUsers => "manage users",
        })
    }
}

/// Check that `role` may perform `action`.
pub fn authorize(role: Role, action: Action) -> Result<(), AccessDenied> {
    if role.can(action) {
        Ok(())
    } else {
        Err(AccessDenied { role, action })
    }
}
