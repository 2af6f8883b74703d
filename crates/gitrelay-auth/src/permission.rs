//! Permission levels for repository access.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permission level for repository access.
///
/// Permissions are ordered: Read < Write < Admin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Can fetch and clone.
    Read,
    /// Can also push.
    Write,
    /// Full control.
    Admin,
}

impl Permission {
    /// Check if this permission level grants at least the required level.
    pub fn has(&self, required: Permission) -> bool {
        *self >= required
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" | "pull" => Ok(Permission::Read),
            "write" | "push" => Ok(Permission::Write),
            "admin" | "owner" => Ok(Permission::Admin),
            other => Err(format!("unknown permission '{other}'")),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_ordering() {
        assert!(Permission::Read < Permission::Write);
        assert!(Permission::Write < Permission::Admin);
    }

    #[test]
    fn test_permission_has() {
        assert!(Permission::Admin.has(Permission::Write));
        assert!(Permission::Write.has(Permission::Read));
        assert!(Permission::Write.has(Permission::Write));
        assert!(!Permission::Write.has(Permission::Admin));
        assert!(!Permission::Read.has(Permission::Write));
    }

    #[test]
    fn test_permission_from_str() {
        assert_eq!("pull".parse::<Permission>(), Ok(Permission::Read));
        assert_eq!("PUSH".parse::<Permission>(), Ok(Permission::Write));
        assert_eq!("owner".parse::<Permission>(), Ok(Permission::Admin));
        assert!("maintain".parse::<Permission>().is_err());
    }

    #[test]
    fn test_permission_serde() {
        assert_eq!(serde_json::to_string(&Permission::Write).unwrap(), "\"write\"");
        let p: Permission = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(p, Permission::Admin);
    }
}
