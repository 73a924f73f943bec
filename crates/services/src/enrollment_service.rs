use std::sync::Arc;

use lms_core::access::{self, EnrollmentOwnership, EnrollmentScope, Principal};
use lms_core::model::{CourseId, Enrollment, EnrollmentId, Lesson, Role, UserId};
use storage::repository::{
    CourseRepository, EnrollmentRepository, NewEnrollmentRecord, Storage, StorageError,
    UserRepository,
};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::error::LmsError;

/// Resolve who may see or act on an enrollment.
pub(crate) async fn ownership_of(
    courses: &dyn CourseRepository,
    enrollment: &Enrollment,
) -> Result<EnrollmentOwnership, LmsError> {
    let course = courses
        .get_course(enrollment.course_id())
        .await?
        .ok_or(LmsError::NotFound)?;
    Ok(EnrollmentOwnership {
        student_id: enrollment.student_id(),
        instructor_id: course.instructor_id(),
    })
}

/// Enrollment lifecycle: enroll, read, list and cancel.
#[derive(Clone)]
pub struct EnrollmentService {
    clock: Clock,
    users: Arc<dyn UserRepository>,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(
        clock: Clock,
        users: Arc<dyn UserRepository>,
        courses: Arc<dyn CourseRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
    ) -> Self {
        Self {
            clock,
            users,
            courses,
            enrollments,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.users),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrollments),
        )
    }

    /// Enroll `student_id` (default: the caller) in `course_id`.
    ///
    /// # Errors
    ///
    /// - `Forbidden` unless the caller is an admin or the student themselves.
    /// - `NotFound` for an unknown course or student.
    /// - `InvalidState` when the target user is not a student.
    /// - `AlreadyEnrolled` for a duplicate (student, course) pair.
    pub async fn enroll(
        &self,
        principal: &Principal,
        course_id: CourseId,
        student_id: Option<UserId>,
    ) -> Result<Enrollment, LmsError> {
        let student_id = student_id.unwrap_or(principal.user_id);
        access::authorize_enroll(principal, student_id)?;

        let student = self
            .users
            .get_user(student_id)
            .await?
            .ok_or(LmsError::NotFound)?;
        if student.role() != Role::Student {
            return Err(LmsError::InvalidState(format!(
                "user {student_id} is not a student"
            )));
        }
        if self.courses.get_course(course_id).await?.is_none() {
            return Err(LmsError::NotFound);
        }

        let inserted = self
            .enrollments
            .insert_enrollment(NewEnrollmentRecord {
                student_id,
                course_id,
                enrolled_at: self.clock.now(),
            })
            .await;
        match inserted {
            Ok(enrollment) => {
                info!(
                    enrollment = %enrollment.id(),
                    student = %student_id,
                    course = %course_id,
                    "enrolled"
                );
                Ok(enrollment)
            }
            Err(StorageError::Conflict) => {
                debug!(student = %student_id, course = %course_id, "duplicate enrollment");
                Err(LmsError::AlreadyEnrolled)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one enrollment the caller may read.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown enrollment, `Forbidden` when it is out of scope.
    pub async fn get(
        &self,
        principal: &Principal,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment, LmsError> {
        let enrollment = self
            .enrollments
            .get_enrollment(enrollment_id)
            .await?
            .ok_or(LmsError::NotFound)?;
        let ownership = ownership_of(self.courses.as_ref(), &enrollment).await?;
        access::authorize_read(principal, &ownership)?;
        Ok(enrollment)
    }

    /// Enrollments visible to the caller, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LmsError::Storage` if repository access fails.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<Enrollment>, LmsError> {
        let scope = EnrollmentScope::for_principal(principal);
        Ok(self.enrollments.list_enrollments(scope).await?)
    }

    /// Cancel an enrollment. Cancelling twice is a no-op.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller is an admin, `NotFound` for an unknown
    /// enrollment.
    pub async fn cancel(
        &self,
        principal: &Principal,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment, LmsError> {
        if let Err(err) = access::authorize_cancel(principal) {
            warn!(user = %principal.user_id, enrollment = %enrollment_id, "cancel rejected");
            return Err(err.into());
        }
        if self.enrollments.cancel_enrollment(enrollment_id).await? {
            info!(enrollment = %enrollment_id, "enrollment cancelled");
        } else {
            debug!(enrollment = %enrollment_id, "enrollment already cancelled");
        }
        self.enrollments
            .get_enrollment(enrollment_id)
            .await?
            .ok_or(LmsError::NotFound)
    }

    /// Lessons of a course in catalog order.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown course.
    pub async fn course_lessons(&self, course_id: CourseId) -> Result<Vec<Lesson>, LmsError> {
        if self.courses.get_course(course_id).await?.is_none() {
            return Err(LmsError::NotFound);
        }
        Ok(self.courses.lessons_for_course(course_id).await?)
    }
}
