//! Role-based access rules for enrollment and progress data.
//!
//! Every check takes the acting [`Principal`] explicitly and matches
//! exhaustively on [`Role`]; there is no ambient "current user".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Role, User, UserId};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessError {
    #[error("you do not have permission to perform this action")]
    Forbidden,

    #[error("you are not enrolled in this course")]
    NotEnrolled,
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    #[must_use]
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    #[must_use]
    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, Role::Admin)
    }

    #[must_use]
    pub fn instructor(user_id: UserId) -> Self {
        Self::new(user_id, Role::Instructor)
    }

    #[must_use]
    pub fn student(user_id: UserId) -> Self {
        Self::new(user_id, Role::Student)
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self::new(user.id(), user.role())
    }
}

/// The fields of a resolved enrollment that access decisions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentOwnership {
    pub student_id: UserId,
    pub instructor_id: UserId,
}

/// Which enrollments a list query may return for a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentScope {
    All,
    InstructedBy(UserId),
    StudentIs(UserId),
}

impl EnrollmentScope {
    #[must_use]
    pub fn for_principal(principal: &Principal) -> Self {
        match principal.role {
            Role::Admin => Self::All,
            Role::Instructor => Self::InstructedBy(principal.user_id),
            Role::Student => Self::StudentIs(principal.user_id),
        }
    }

    #[must_use]
    pub fn admits(&self, ownership: &EnrollmentOwnership) -> bool {
        match self {
            Self::All => true,
            Self::InstructedBy(id) => ownership.instructor_id == *id,
            Self::StudentIs(id) => ownership.student_id == *id,
        }
    }
}

/// Read one enrollment (or its ledger rows).
///
/// # Errors
///
/// `Forbidden` unless admin, the course's instructor, or the enrolled student.
pub fn authorize_read(
    principal: &Principal,
    ownership: &EnrollmentOwnership,
) -> Result<(), AccessError> {
    if EnrollmentScope::for_principal(principal).admits(ownership) {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

/// Record lesson progress on an enrollment.
///
/// # Errors
///
/// Students acting on someone else's enrollment get `NotEnrolled`;
/// instructors always get `Forbidden`.
pub fn authorize_progress_update(
    principal: &Principal,
    ownership: &EnrollmentOwnership,
) -> Result<(), AccessError> {
    match principal.role {
        Role::Admin => Ok(()),
        Role::Instructor => Err(AccessError::Forbidden),
        Role::Student if ownership.student_id == principal.user_id => Ok(()),
        Role::Student => Err(AccessError::NotEnrolled),
    }
}

/// Create an enrollment for `student_id`.
///
/// # Errors
///
/// `Forbidden` for instructors and for students enrolling someone else.
pub fn authorize_enroll(principal: &Principal, student_id: UserId) -> Result<(), AccessError> {
    match principal.role {
        Role::Admin => Ok(()),
        Role::Student if student_id == principal.user_id => Ok(()),
        Role::Student | Role::Instructor => Err(AccessError::Forbidden),
    }
}

/// Cancel an enrollment.
///
/// # Errors
///
/// `Forbidden` for everyone but admins.
pub fn authorize_cancel(principal: &Principal) -> Result<(), AccessError> {
    match principal.role {
        Role::Admin => Ok(()),
        Role::Instructor | Role::Student => Err(AccessError::Forbidden),
    }
}

/// The role dashboards exposed by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dashboard {
    Admin,
    Instructor,
    Student,
}

/// View a role dashboard.
///
/// # Errors
///
/// `Forbidden` when the role may not see that dashboard.
pub fn authorize_dashboard(principal: &Principal, dashboard: Dashboard) -> Result<(), AccessError> {
    let allowed = match dashboard {
        Dashboard::Admin => matches!(principal.role, Role::Admin),
        Dashboard::Instructor => matches!(principal.role, Role::Admin | Role::Instructor),
        Dashboard::Student => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUDENT: UserId = UserId::new(1);
    const OTHER_STUDENT: UserId = UserId::new(2);
    const INSTRUCTOR: UserId = UserId::new(3);
    const OTHER_INSTRUCTOR: UserId = UserId::new(4);
    const ADMIN: UserId = UserId::new(5);

    fn ownership() -> EnrollmentOwnership {
        EnrollmentOwnership {
            student_id: STUDENT,
            instructor_id: INSTRUCTOR,
        }
    }

    #[test]
    fn read_matrix() {
        let o = ownership();
        assert!(authorize_read(&Principal::admin(ADMIN), &o).is_ok());
        assert!(authorize_read(&Principal::instructor(INSTRUCTOR), &o).is_ok());
        assert!(authorize_read(&Principal::student(STUDENT), &o).is_ok());

        assert_eq!(
            authorize_read(&Principal::instructor(OTHER_INSTRUCTOR), &o),
            Err(AccessError::Forbidden)
        );
        assert_eq!(
            authorize_read(&Principal::student(OTHER_STUDENT), &o),
            Err(AccessError::Forbidden)
        );
    }

    #[test]
    fn progress_update_matrix() {
        let o = ownership();
        assert!(authorize_progress_update(&Principal::admin(ADMIN), &o).is_ok());
        assert!(authorize_progress_update(&Principal::student(STUDENT), &o).is_ok());
        assert_eq!(
            authorize_progress_update(&Principal::instructor(INSTRUCTOR), &o),
            Err(AccessError::Forbidden)
        );
        assert_eq!(
            authorize_progress_update(&Principal::student(OTHER_STUDENT), &o),
            Err(AccessError::NotEnrolled)
        );
    }

    #[test]
    fn list_scope_follows_role() {
        let o = ownership();
        assert_eq!(
            EnrollmentScope::for_principal(&Principal::admin(ADMIN)),
            EnrollmentScope::All
        );
        assert!(EnrollmentScope::InstructedBy(INSTRUCTOR).admits(&o));
        assert!(!EnrollmentScope::InstructedBy(OTHER_INSTRUCTOR).admits(&o));
        assert!(!EnrollmentScope::StudentIs(OTHER_STUDENT).admits(&o));
    }

    #[test]
    fn enroll_and_cancel_rules() {
        assert!(authorize_enroll(&Principal::student(STUDENT), STUDENT).is_ok());
        assert!(authorize_enroll(&Principal::admin(ADMIN), STUDENT).is_ok());
        assert_eq!(
            authorize_enroll(&Principal::student(STUDENT), OTHER_STUDENT),
            Err(AccessError::Forbidden)
        );
        assert_eq!(
            authorize_enroll(&Principal::instructor(INSTRUCTOR), INSTRUCTOR),
            Err(AccessError::Forbidden)
        );

        assert!(authorize_cancel(&Principal::admin(ADMIN)).is_ok());
        assert_eq!(
            authorize_cancel(&Principal::student(STUDENT)),
            Err(AccessError::Forbidden)
        );
    }

    #[test]
    fn dashboard_rules() {
        let student = Principal::student(STUDENT);
        let instructor = Principal::instructor(INSTRUCTOR);
        let admin = Principal::admin(ADMIN);

        assert_eq!(
            authorize_dashboard(&student, Dashboard::Admin),
            Err(AccessError::Forbidden)
        );
        assert_eq!(
            authorize_dashboard(&instructor, Dashboard::Admin),
            Err(AccessError::Forbidden)
        );
        assert!(authorize_dashboard(&admin, Dashboard::Instructor).is_ok());
        assert_eq!(
            authorize_dashboard(&student, Dashboard::Instructor),
            Err(AccessError::Forbidden)
        );
        assert!(authorize_dashboard(&instructor, Dashboard::Student).is_ok());
    }
}
