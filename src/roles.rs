use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

/// Role
///
/// A named privilege tier. Ordering between roles is NOT derived from the enum;
/// it is owned by the `RoleHierarchy` injected into the application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    /// Can only read content.
    Reader,
    /// Can create and edit content.
    Contributor,
    /// Can manage everything except system settings.
    Editor,
    /// Can manage everything.
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Reader, Role::Contributor, Role::Editor, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Contributor => "contributor",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    #[error("unknown role: {0:?}")]
    UnknownRole(String),
    #[error("role hierarchy must not be empty")]
    EmptyHierarchy,
    #[error("role {0} appears more than once in the hierarchy")]
    DuplicateRole(Role),
}

impl FromStr for Role {
    type Err = RoleError;

    /// Boundary validation: anything outside the closed set is rejected here,
    /// so an unrecognised role can never reach a comparison.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Role::Reader),
            "contributor" => Ok(Role::Contributor),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            other => Err(RoleError::UnknownRole(other.to_string())),
        }
    }
}

/// RoleHierarchy
///
/// The ordered list of roles, lowest privilege first. Anything a lower role can do,
/// a higher role can also do. Built once at startup and shared through `AppState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHierarchy {
    order: Vec<Role>,
}

impl Default for RoleHierarchy {
    fn default() -> Self {
        Self {
            order: Role::ALL.to_vec(),
        }
    }
}

impl RoleHierarchy {
    /// Builds a hierarchy from an explicit ordering. Rejects empty and duplicated lists.
    pub fn new(order: Vec<Role>) -> Result<Self, RoleError> {
        if order.is_empty() {
            return Err(RoleError::EmptyHierarchy);
        }
        for (i, role) in order.iter().enumerate() {
            if order[..i].contains(role) {
                return Err(RoleError::DuplicateRole(*role));
            }
        }
        Ok(Self { order })
    }

    /// Position of `role` in the hierarchy, `None` if the hierarchy does not list it.
    pub fn rank(&self, role: Role) -> Option<usize> {
        self.order.iter().position(|r| *r == role)
    }

    /// True iff `user_role` ranks at or above `required`.
    /// A role missing from the hierarchy on either side is a denial.
    pub fn has_role_or_above(&self, user_role: Role, required: Role) -> bool {
        match (self.rank(user_role), self.rank(required)) {
            (Some(user), Some(required)) => user >= required,
            _ => false,
        }
    }

    pub fn roles(&self) -> &[Role] {
        &self.order
    }
}
