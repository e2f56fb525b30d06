//! Role levels carried in the session token
//!
//! Roles are ordered so a route can state the minimum role it needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role claim stored on the user and copied into session tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Role {
    /// Registered student - own dashboard, enrollments, payments
    #[default]
    Student = 1,
    /// Back office staff - everything under /api/admin
    Admin = 2,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => write!(f, "STUDENT"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STUDENT" => Ok(Role::Student),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Check whether `actual` satisfies a route requiring `required`
pub fn is_role_allowed(required: Role, actual: Role) -> bool {
    actual >= required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::Student);
        assert!(is_role_allowed(Role::Student, Role::Admin));
        assert!(is_role_allowed(Role::Admin, Role::Admin));
        assert!(!is_role_allowed(Role::Admin, Role::Student));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("STUDENT".parse::<Role>().unwrap(), Role::Student);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        let role: Role = serde_json::from_str("\"STUDENT\"").unwrap();
        assert_eq!(role, Role::Student);
    }
}
