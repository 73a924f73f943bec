use std::sync::Arc;

use lms_core::access::{self, EnrollmentOwnership, Principal};
use lms_core::model::{Enrollment, EnrollmentId, Lesson, LessonId, ProgressRecord};
use storage::repository::{
    CourseRepository, EnrollmentRepository, LessonCompletion, ProgressLedger,
    ProgressPersistence, Storage,
};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::enrollment_service::ownership_of;
use crate::error::LmsError;

/// Records lesson completions and exposes per-lesson progress.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    ledger: Arc<dyn ProgressLedger>,
    progress: Arc<dyn ProgressPersistence>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        ledger: Arc<dyn ProgressLedger>,
        progress: Arc<dyn ProgressPersistence>,
    ) -> Self {
        Self {
            clock,
            courses,
            enrollments,
            ledger,
            progress,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.ledger),
            Arc::clone(&storage.progress),
        )
    }

    /// Mark `lesson_id` completed on `enrollment_id` and recompute progress.
    ///
    /// Completing an already-completed lesson is a no-op that returns the
    /// enrollment unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown enrollment or lesson.
    /// - `NotEnrolled` / `Forbidden` when the principal may not record progress.
    /// - `LessonNotInCourse` when the lesson belongs to another course.
    /// - `InvalidState` when the enrollment is cancelled.
    pub async fn complete_lesson(
        &self,
        principal: &Principal,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<LessonCompletion, LmsError> {
        let enrollment = self
            .enrollments
            .get_enrollment(enrollment_id)
            .await?
            .ok_or(LmsError::NotFound)?;
        let ownership = self.ownership(&enrollment).await?;
        if let Err(err) = access::authorize_progress_update(principal, &ownership) {
            warn!(
                user = %principal.user_id,
                enrollment = %enrollment_id,
                "progress update rejected: {err}"
            );
            return Err(err.into());
        }

        let lesson = self.lesson(lesson_id).await?;
        self.record(enrollment, &lesson).await
    }

    /// Complete a lesson on the caller's own enrollment in the lesson's course.
    ///
    /// # Errors
    ///
    /// `NotEnrolled` when the caller has no enrollment for that course, plus the
    /// errors of [`ProgressService::complete_lesson`].
    pub async fn complete_lesson_for_caller(
        &self,
        principal: &Principal,
        lesson_id: LessonId,
    ) -> Result<LessonCompletion, LmsError> {
        let lesson = self.lesson(lesson_id).await?;
        let enrollment = self.caller_enrollment(principal, &lesson).await?;
        self.record(enrollment, &lesson).await
    }

    /// Whether the caller has completed `lesson_id`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown lesson, `NotEnrolled` if the caller is not
    /// enrolled in its course.
    pub async fn lesson_status(
        &self,
        principal: &Principal,
        lesson_id: LessonId,
    ) -> Result<bool, LmsError> {
        let lesson = self.lesson(lesson_id).await?;
        let enrollment = self.caller_enrollment(principal, &lesson).await?;
        let record = self.ledger.get_record(enrollment.id(), lesson_id).await?;
        Ok(record.is_some_and(|r| r.is_completed()))
    }

    /// Ledger rows of an enrollment, ordered by lesson id.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown enrollment, `Forbidden` when the principal may
    /// not read it.
    pub async fn enrollment_progress(
        &self,
        principal: &Principal,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<ProgressRecord>, LmsError> {
        let enrollment = self
            .enrollments
            .get_enrollment(enrollment_id)
            .await?
            .ok_or(LmsError::NotFound)?;
        let ownership = self.ownership(&enrollment).await?;
        access::authorize_read(principal, &ownership)?;
        Ok(self.ledger.records_for_enrollment(enrollment_id).await?)
    }

    async fn record(
        &self,
        enrollment: Enrollment,
        lesson: &Lesson,
    ) -> Result<LessonCompletion, LmsError> {
        if !lesson.belongs_to(enrollment.course_id()) {
            warn!(
                enrollment = %enrollment.id(),
                lesson = %lesson.id(),
                "lesson belongs to course {}",
                lesson.course_id()
            );
            return Err(LmsError::LessonNotInCourse);
        }
        enrollment.ensure_accepts_progress()?;

        let completion = self
            .progress
            .complete_lesson(enrollment.id(), lesson.id(), self.clock.now())
            .await?;

        match completion.update {
            None => debug!(
                enrollment = %enrollment.id(),
                lesson = %lesson.id(),
                "lesson already completed"
            ),
            Some(update) => info!(
                enrollment = %enrollment.id(),
                lesson = %lesson.id(),
                previous = %update.previous,
                current = %update.current,
                completed = update.became_completed,
                "lesson completed"
            ),
        }
        Ok(completion)
    }

    async fn lesson(&self, lesson_id: LessonId) -> Result<Lesson, LmsError> {
        self.courses
            .get_lesson(lesson_id)
            .await?
            .ok_or(LmsError::NotFound)
    }

    async fn caller_enrollment(
        &self,
        principal: &Principal,
        lesson: &Lesson,
    ) -> Result<Enrollment, LmsError> {
        self.enrollments
            .find_enrollment(principal.user_id, lesson.course_id())
            .await?
            .ok_or(LmsError::NotEnrolled)
    }

    async fn ownership(&self, enrollment: &Enrollment) -> Result<EnrollmentOwnership, LmsError> {
        ownership_of(self.courses.as_ref(), enrollment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lms_core::model::{EnrollmentStatus, Role, UserId};
    use lms_core::time::{fixed_clock, fixed_now};
    use storage::repository::{
        NewCourseRecord, NewEnrollmentRecord, NewLessonRecord, NewUserRecord,
    };

    async fn setup(lessons: u32) -> (ProgressService, Storage, UserId, Vec<LessonId>, Enrollment) {
        let storage = Storage::in_memory();
        let instructor = storage
            .users
            .insert_user(NewUserRecord {
                email: "i@example.com".into(),
                display_name: "I".into(),
                role: Role::Instructor,
            })
            .await
            .unwrap();
        let student = storage
            .users
            .insert_user(NewUserRecord {
                email: "s@example.com".into(),
                display_name: "S".into(),
                role: Role::Student,
            })
            .await
            .unwrap();
        let course = storage
            .courses
            .insert_course(NewCourseRecord {
                instructor_id: instructor,
                title: "Course".into(),
                is_published: true,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        for position in 0..lessons {
            ids.push(
                storage
                    .courses
                    .insert_lesson(NewLessonRecord {
                        course_id: course,
                        title: format!("L{position}"),
                        position,
                        is_preview: false,
                        created_at: fixed_now(),
                    })
                    .await
                    .unwrap(),
            );
        }
        let enrollment = storage
            .enrollments
            .insert_enrollment(NewEnrollmentRecord {
                student_id: student,
                course_id: course,
                enrolled_at: fixed_now(),
            })
            .await
            .unwrap();
        let service = ProgressService::from_storage(fixed_clock(), &storage);
        (service, storage, student, ids, enrollment)
    }

    #[tokio::test]
    async fn student_completes_own_lesson() {
        let (service, _, student, lessons, enrollment) = setup(2).await;
        let done = service
            .complete_lesson(&Principal::student(student), enrollment.id(), lessons[0])
            .await
            .unwrap();
        assert_eq!(done.enrollment.progress().to_string(), "50.00");
        assert_eq!(done.enrollment.status(), EnrollmentStatus::Active);
    }

    #[tokio::test]
    async fn instructor_cannot_record_progress() {
        let (service, _, _, lessons, enrollment) = setup(1).await;
        let err = service
            .complete_lesson(&Principal::instructor(UserId::new(1)), enrollment.id(), lessons[0])
            .await
            .unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));
    }

    #[tokio::test]
    async fn unknown_lesson_is_not_found() {
        let (service, _, student, _, enrollment) = setup(1).await;
        let err = service
            .complete_lesson(&Principal::student(student), enrollment.id(), LessonId::new(999))
            .await
            .unwrap_err();
        assert!(matches!(err, LmsError::NotFound));
    }

    #[tokio::test]
    async fn lesson_status_requires_enrollment() {
        let (service, _, student, lessons, _) = setup(1).await;

        let err = service
            .lesson_status(&Principal::student(UserId::new(404)), lessons[0])
            .await
            .unwrap_err();
        assert!(matches!(err, LmsError::NotEnrolled));

        let principal = Principal::student(student);
        assert!(!service.lesson_status(&principal, lessons[0]).await.unwrap());
        service
            .complete_lesson_for_caller(&principal, lessons[0])
            .await
            .unwrap();
        assert!(service.lesson_status(&principal, lessons[0]).await.unwrap());
    }

    #[tokio::test]
    async fn ledger_read_is_policy_checked() {
        let (service, _, student, lessons, enrollment) = setup(2).await;
        service
            .complete_lesson(&Principal::student(student), enrollment.id(), lessons[1])
            .await
            .unwrap();

        let rows = service
            .enrollment_progress(&Principal::admin(UserId::new(77)), enrollment.id())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].lesson_id(), lessons[1]);

        let err = service
            .enrollment_progress(&Principal::student(UserId::new(404)), enrollment.id())
            .await
            .unwrap_err();
        assert!(matches!(err, LmsError::Forbidden));

        let err = service
            .enrollment_progress(&Principal::admin(UserId::new(77)), EnrollmentId::new(4040))
            .await
            .unwrap_err();
        assert!(matches!(err, LmsError::NotFound));
    }

    #[tokio::test]
    async fn course_ids_are_checked_before_persisting() {
        let (service, storage, student, _, enrollment) = setup(1).await;
        let other_course = storage
            .courses
            .insert_course(NewCourseRecord {
                instructor_id: UserId::new(1),
                title: "Other".into(),
                is_published: true,
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        let foreign = storage
            .courses
            .insert_lesson(NewLessonRecord {
                course_id: other_course,
                title: "Foreign".into(),
                position: 0,
                is_preview: false,
                created_at: fixed_now(),
            })
            .await
            .unwrap();

        let err = service
            .complete_lesson(&Principal::student(student), enrollment.id(), foreign)
            .await
            .unwrap_err();
        assert!(matches!(err, LmsError::LessonNotInCourse));
        assert!(
            storage
                .ledger
                .get_record(enrollment.id(), foreign)
                .await
                .unwrap()
                .is_none()
        );
    }
}
