use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserError {
    #[error("user email cannot be empty")]
    EmptyEmail,

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// The closed set of roles a principal can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Instructor, Role::Student];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Instructor => "instructor",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "instructor" => Ok(Role::Instructor),
            "student" => Ok(Role::Student),
            other => Err(UserError::UnknownRole(other.to_owned())),
        }
    }
}

/// An account known to the LMS. Credentials live with the external auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    email: String,
    display_name: String,
    role: Role,
}

impl User {
    /// Build a user, trimming the email and display name.
    ///
    /// # Errors
    ///
    /// Returns `UserError::EmptyEmail` when the email is blank.
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
    ) -> Result<Self, UserError> {
        let email = email.into().trim().to_owned();
        if email.is_empty() {
            return Err(UserError::EmptyEmail);
        }
        let display_name = display_name.into().trim().to_owned();
        Ok(Self {
            id,
            email,
            display_name,
            role,
        })
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Display name, falling back to the email when none was given.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.email
        } else {
            &self.display_name
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }
}
