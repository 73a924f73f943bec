//! Shared error types for the services crate.

use thiserror::Error;

use lms_core::access::AccessError;
use lms_core::model::EnrollmentError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by the enrollment, progress and dashboard services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LmsError {
    #[error("you are not enrolled in this course")]
    NotEnrolled,

    #[error("lesson does not belong to this course")]
    LessonNotInCourse,

    #[error("you are already enrolled in this course")]
    AlreadyEnrolled,

    #[error("you do not have permission to perform this action")]
    Forbidden,

    #[error("{0}")]
    InvalidState(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Storage(StorageError),
}

impl From<AccessError> for LmsError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotEnrolled => Self::NotEnrolled,
            _ => Self::Forbidden,
        }
    }
}

impl From<EnrollmentError> for LmsError {
    fn from(err: EnrollmentError) -> Self {
        Self::InvalidState(err.to_string())
    }
}

impl From<StorageError> for LmsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::NotFound,
            StorageError::Rejected(err) => err.into(),
            other => Self::Storage(other),
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
