//! User roles
//!
//! Accounts live in the hosted auth provider. The service only sees the
//! role carried by the bearer token; "host" and "guest" are relations to a
//! reservation, not roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User role enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Any signed-in user
    #[default]
    #[serde(alias = "user")]
    Authenticated,
    /// Moderation staff
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Authenticated => write!(f, "authenticated"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl UserRole {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "authenticated" | "user" => Some(UserRole::Authenticated),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    /// Check if role has moderation privileges
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(UserRole::parse("ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::parse("user"), Some(UserRole::Authenticated));
        assert_eq!(UserRole::parse("superadmin"), None);
    }

    #[test]
    fn test_role_serde() {
        let role: UserRole = serde_json::from_str("\"authenticated\"").unwrap();
        assert_eq!(role, UserRole::Authenticated);
        assert!(!role.is_admin());
        assert_eq!(serde_json::to_string(&UserRole::Admin).unwrap(), "\"admin\"");
    }
}
