use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewFormations,
    CreateFormations,
    EditOwnFormations,
    ShareOwnFormations,

    EditClubFormations,
    ShareClubFormations,

    ManageSystemFormations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coach,
    ClubAdmin,
    SystemAdmin,
}

static COACH_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewFormations);
    permissions.insert(Permission::CreateFormations);
    permissions.insert(Permission::EditOwnFormations);
    permissions.insert(Permission::ShareOwnFormations);

    permissions
});

static CLUB_ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(COACH_PERMISSIONS.iter().copied());

    permissions.insert(Permission::EditClubFormations);
    permissions.insert(Permission::ShareClubFormations);

    permissions
});

static SYSTEM_ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(CLUB_ADMIN_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageSystemFormations);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Coach => &COACH_PERMISSIONS,
            Role::ClubAdmin => &CLUB_ADMIN_PERMISSIONS,
            Role::SystemAdmin => &SYSTEM_ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Coach => "coach",
            Role::ClubAdmin => "club_admin",
            Role::SystemAdmin => "system_admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "coach" => Ok(Role::Coach),
            "club_admin" => Ok(Role::ClubAdmin),
            "system_admin" => Ok(Role::SystemAdmin),
            _ => Err(AppError::validation("role", format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
