//! The authenticated caller, as resolved by the upstream identity layer.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Marketplace role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated user on whose behalf an operation runs.
///
/// Every operation that reads or mutates a user-owned resource checks
/// ownership against this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
    pub email: Option<String>,
}

impl Principal {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            email: None,
        }
    }

    pub fn student(user_id: UserId) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn teacher(user_id: UserId) -> Self {
        Self::new(user_id, Role::Teacher)
    }

    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Returns true if the principal is `owner` or an admin.
    pub fn owns_or_admin(&self, owner: UserId) -> bool {
        self.user_id == owner || self.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Student".parse::<Role>().unwrap(), Role::Student);
        assert_eq!(" ADMIN ".parse::<Role>().unwrap(), Role::Admin);
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn admin_owns_everything() {
        let owner = UserId::new();
        assert!(Principal::admin(UserId::new()).owns_or_admin(owner));
        assert!(Principal::student(owner).owns_or_admin(owner));
        assert!(!Principal::student(UserId::new()).owns_or_admin(owner));
    }
}
