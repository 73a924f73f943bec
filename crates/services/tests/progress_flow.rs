use std::sync::Arc;

use async_trait::async_trait;
use lms_core::access::{EnrollmentScope, Principal};
use lms_core::model::{
    CourseId, Enrollment, EnrollmentId, EnrollmentStatus, LessonId, Progress, Role, UserId,
};
use lms_core::time::fixed_now;
use services::{AppServices, Clock, EnrollmentService, LmsError, ProgressService};
use storage::repository::{
    EnrollmentRepository, NewCourseRecord, NewEnrollmentRecord, NewLessonRecord, NewUserRecord,
    ProgressPersistence, Storage, StorageError,
};

struct Classroom {
    services: AppServices,
    admin: Principal,
    student: Principal,
    course: CourseId,
    lessons: Vec<LessonId>,
    enrollment: Enrollment,
}

async fn add_lesson(storage: &Storage, course_id: CourseId, position: u32) -> LessonId {
    storage
        .courses
        .insert_lesson(NewLessonRecord {
            course_id,
            title: format!("Lesson {position}"),
            position,
            is_preview: false,
            created_at: fixed_now(),
        })
        .await
        .expect("insert lesson")
}

async fn add_user(storage: &Storage, email: &str, role: Role) -> UserId {
    storage
        .users
        .insert_user(NewUserRecord {
            email: email.into(),
            display_name: email.into(),
            role,
        })
        .await
        .expect("insert user")
}

async fn classroom(storage: Storage, lesson_count: u32) -> Classroom {
    let admin = add_user(&storage, "admin@example.com", Role::Admin).await;
    let instructor = add_user(&storage, "teach@example.com", Role::Instructor).await;
    let student = add_user(&storage, "learn@example.com", Role::Student).await;
    let course = storage
        .courses
        .insert_course(NewCourseRecord {
            instructor_id: instructor,
            title: "Progress 101".into(),
            is_published: true,
            created_at: fixed_now(),
        })
        .await
        .expect("insert course");
    let mut lessons = Vec::new();
    for position in 0..lesson_count {
        lessons.push(add_lesson(&storage, course, position).await);
    }

    let services = AppServices::from_storage(storage, Clock::fixed(fixed_now()));
    let student = Principal::student(student);
    let enrollment = services
        .enrollments()
        .enroll(&student, course, None)
        .await
        .expect("enroll");

    Classroom {
        services,
        admin: Principal::admin(admin),
        student,
        course,
        lessons,
        enrollment,
    }
}

async fn complete(c: &Classroom, lesson: LessonId) -> Result<Enrollment, LmsError> {
    c.services
        .progress()
        .complete_lesson(&c.student, c.enrollment.id(), lesson)
        .await
        .map(|done| done.enrollment)
}

#[tokio::test]
async fn scenario_a_four_lessons_in_order() {
    let c = classroom(Storage::in_memory(), 4).await;

    let mut seen = Vec::new();
    for lesson in &c.lessons {
        let enrollment = complete(&c, *lesson).await.unwrap();
        seen.push((enrollment.progress().to_string(), enrollment.status()));
    }

    assert_eq!(
        seen,
        vec![
            ("25.00".to_string(), EnrollmentStatus::Active),
            ("50.00".to_string(), EnrollmentStatus::Active),
            ("75.00".to_string(), EnrollmentStatus::Active),
            ("100.00".to_string(), EnrollmentStatus::Completed),
        ]
    );

    let stored = c
        .services
        .enrollments()
        .get(&c.student, c.enrollment.id())
        .await
        .unwrap();
    assert_eq!(stored.completed_at(), Some(fixed_now()));
}

#[tokio::test]
async fn scenario_b_repeat_completion_is_idempotent() {
    let c = classroom(Storage::in_memory(), 3).await;

    let first = c
        .services
        .progress()
        .complete_lesson(&c.student, c.enrollment.id(), c.lessons[0])
        .await
        .unwrap();
    let second = c
        .services
        .progress()
        .complete_lesson(&c.student, c.enrollment.id(), c.lessons[0])
        .await
        .unwrap();

    assert_eq!(first.enrollment.progress().to_string(), "33.33");
    assert!(second.was_noop());
    assert_eq!(second.enrollment, first.enrollment);

    let rows = c
        .services
        .progress()
        .enrollment_progress(&c.student, c.enrollment.id())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn scenario_c_foreign_lesson_is_rejected() {
    let c = classroom(Storage::in_memory(), 2).await;
    let storage = c.services.storage().clone();
    let other = storage
        .courses
        .insert_course(NewCourseRecord {
            instructor_id: UserId::new(2),
            title: "Elsewhere".into(),
            is_published: false,
            created_at: fixed_now(),
        })
        .await
        .unwrap();
    let foreign = add_lesson(&storage, other, 0).await;

    let err = complete(&c, foreign).await.unwrap_err();
    assert!(matches!(err, LmsError::LessonNotInCourse));

    let unchanged = c
        .services
        .enrollments()
        .get(&c.student, c.enrollment.id())
        .await
        .unwrap();
    assert_eq!(unchanged.progress(), Progress::ZERO);
}

#[tokio::test]
async fn scenario_c_foreign_lesson_on_course_without_lessons() {
    let c = classroom(Storage::in_memory(), 0).await;
    let storage = c.services.storage().clone();
    let other = storage
        .courses
        .insert_course(NewCourseRecord {
            instructor_id: UserId::new(2),
            title: "Elsewhere".into(),
            is_published: true,
            created_at: fixed_now(),
        })
        .await
        .unwrap();
    let foreign = add_lesson(&storage, other, 0).await;

    let err = complete(&c, foreign).await.unwrap_err();
    assert!(matches!(err, LmsError::LessonNotInCourse));

    let stored = c
        .services
        .enrollments()
        .get(&c.student, c.enrollment.id())
        .await
        .unwrap();
    assert_eq!(stored.progress(), Progress::ZERO);
    assert_eq!(stored.status(), EnrollmentStatus::Active);
    let rows = c
        .services
        .progress()
        .enrollment_progress(&c.student, c.enrollment.id())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

async fn race_two_lessons(storage: Storage) {
    let c = Arc::new(classroom(storage, 2).await);

    let a = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { complete(&c, c.lessons[0]).await })
    };
    let b = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { complete(&c, c.lessons[1]).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let stored = c
        .services
        .enrollments()
        .get(&c.admin, c.enrollment.id())
        .await
        .unwrap();
    assert_eq!(stored.progress(), Progress::COMPLETE);
    assert_eq!(stored.status(), EnrollmentStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_d_concurrent_completions_in_memory() {
    race_two_lessons(Storage::in_memory()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_d_concurrent_completions_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("race.sqlite3").display());
    let storage = Storage::sqlite(&url).await.expect("open sqlite");
    race_two_lessons(storage).await;
}

#[tokio::test]
async fn progress_is_monotonic_for_a_fixed_catalog() {
    let c = classroom(Storage::in_memory(), 5).await;

    let mut last = Progress::ZERO;
    for lesson in c.lessons.iter().rev() {
        let enrollment = complete(&c, *lesson).await.unwrap();
        assert!(enrollment.progress() > last);
        last = enrollment.progress();
    }
    assert_eq!(last, Progress::COMPLETE);
}

#[tokio::test]
async fn added_lesson_lowers_next_recompute() {
    let c = classroom(Storage::in_memory(), 2).await;
    complete(&c, c.lessons[0]).await.unwrap();

    let storage = c.services.storage().clone();
    add_lesson(&storage, c.course, 2).await;
    add_lesson(&storage, c.course, 3).await;

    let enrollment = complete(&c, c.lessons[1]).await.unwrap();
    assert_eq!(enrollment.progress().to_string(), "50.00");
    assert_eq!(enrollment.status(), EnrollmentStatus::Active);
}

#[tokio::test]
async fn completed_enrollment_never_regresses_status() {
    let c = classroom(Storage::in_memory(), 1).await;
    let done = complete(&c, c.lessons[0]).await.unwrap();
    assert_eq!(done.status(), EnrollmentStatus::Completed);

    let storage = c.services.storage().clone();
    let extra = add_lesson(&storage, c.course, 1).await;
    let third = add_lesson(&storage, c.course, 2).await;

    let after = complete(&c, extra).await.unwrap();
    assert_eq!(after.progress().to_string(), "66.67");
    assert_eq!(after.status(), EnrollmentStatus::Completed);
    assert_eq!(after.completed_at(), done.completed_at());

    let full = complete(&c, third).await.unwrap();
    assert_eq!(full.progress(), Progress::COMPLETE);
    assert_eq!(full.completed_at(), done.completed_at());
}

#[tokio::test]
async fn cancelled_enrollment_rejects_completion() {
    let c = classroom(Storage::in_memory(), 2).await;
    c.services
        .enrollments()
        .cancel(&c.admin, c.enrollment.id())
        .await
        .unwrap();

    let err = complete(&c, c.lessons[0]).await.unwrap_err();
    assert!(matches!(err, LmsError::InvalidState(_)));

    let stored = c
        .services
        .enrollments()
        .get(&c.admin, c.enrollment.id())
        .await
        .unwrap();
    assert_eq!(stored.status(), EnrollmentStatus::Cancelled);
    assert_eq!(stored.progress(), Progress::ZERO);
}

#[tokio::test]
async fn duplicate_enrollment_is_already_enrolled() {
    let c = classroom(Storage::in_memory(), 1).await;
    let err = c
        .services
        .enrollments()
        .enroll(&c.student, c.course, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::AlreadyEnrolled));
}

#[tokio::test]
async fn other_students_are_not_enrolled() {
    let c = classroom(Storage::in_memory(), 1).await;
    let stranger = Principal::student(UserId::new(404));

    let err = c
        .services
        .progress()
        .complete_lesson(&stranger, c.enrollment.id(), c.lessons[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::NotEnrolled));

    let err = c
        .services
        .progress()
        .complete_lesson_for_caller(&stranger, c.lessons[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::NotEnrolled));
}

#[tokio::test]
async fn sqlite_flow_matches_in_memory() {
    let storage = Storage::sqlite("sqlite:file:memdb_progress_flow?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    let c = classroom(storage, 3).await;

    let first = complete(&c, c.lessons[2]).await.unwrap();
    assert_eq!(first.progress().to_string(), "33.33");
    let repeat = complete(&c, c.lessons[2]).await.unwrap();
    assert_eq!(repeat, first);

    let via_lesson = c
        .services
        .progress()
        .complete_lesson_for_caller(&c.student, c.lessons[0])
        .await
        .unwrap();
    assert_eq!(via_lesson.enrollment.progress().to_string(), "66.67");
    assert!(
        c.services
            .progress()
            .lesson_status(&c.student, c.lessons[0])
            .await
            .unwrap()
    );
}

/// Enrollment store that lets another writer slip in at a chosen point.
struct Interleaved {
    inner: Arc<dyn EnrollmentRepository>,
    hook: Hook,
}

enum Hook {
    /// Complete a lesson right before the cancel reaches the store.
    CompleteBeforeCancel {
        progress: Arc<dyn ProgressPersistence>,
        lesson: LessonId,
    },
    /// Cancel the row right after handing out an active snapshot.
    CancelAfterRead,
}

#[async_trait]
impl EnrollmentRepository for Interleaved {
    async fn insert_enrollment(
        &self,
        enrollment: NewEnrollmentRecord,
    ) -> Result<Enrollment, StorageError> {
        self.inner.insert_enrollment(enrollment).await
    }

    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StorageError> {
        let snapshot = self.inner.get_enrollment(id).await?;
        if matches!(self.hook, Hook::CancelAfterRead) && snapshot.is_some() {
            self.inner.cancel_enrollment(id).await?;
        }
        Ok(snapshot)
    }

    async fn find_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        self.inner.find_enrollment(student_id, course_id).await
    }

    async fn list_enrollments(
        &self,
        scope: EnrollmentScope,
    ) -> Result<Vec<Enrollment>, StorageError> {
        self.inner.list_enrollments(scope).await
    }

    async fn cancel_enrollment(&self, id: EnrollmentId) -> Result<bool, StorageError> {
        if let Hook::CompleteBeforeCancel { progress, lesson } = &self.hook {
            progress.complete_lesson(id, *lesson, fixed_now()).await?;
        }
        self.inner.cancel_enrollment(id).await
    }
}

async fn cancel_keeps_concurrent_completion(storage: Storage) {
    let c = classroom(storage, 1).await;
    let storage = c.services.storage().clone();
    let enrollments = Interleaved {
        inner: Arc::clone(&storage.enrollments),
        hook: Hook::CompleteBeforeCancel {
            progress: Arc::clone(&storage.progress),
            lesson: c.lessons[0],
        },
    };
    let service = EnrollmentService::new(
        Clock::fixed(fixed_now()),
        Arc::clone(&storage.users),
        Arc::clone(&storage.courses),
        Arc::new(enrollments),
    );

    let cancelled = service.cancel(&c.admin, c.enrollment.id()).await.unwrap();
    assert_eq!(cancelled.status(), EnrollmentStatus::Cancelled);
    assert_eq!(cancelled.progress(), Progress::COMPLETE);
    assert_eq!(cancelled.completed_at(), Some(fixed_now()));

    let rows = storage
        .ledger
        .records_for_enrollment(c.enrollment.id())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_completed());
}

#[tokio::test]
async fn cancel_keeps_concurrent_completion_in_memory() {
    cancel_keeps_concurrent_completion(Storage::in_memory()).await;
}

#[tokio::test]
async fn cancel_keeps_concurrent_completion_sqlite() {
    let storage = Storage::sqlite("sqlite:file:memdb_cancel_race?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    cancel_keeps_concurrent_completion(storage).await;
}

async fn completion_rejected_after_concurrent_cancel(storage: Storage) {
    let c = classroom(storage, 2).await;
    let storage = c.services.storage().clone();
    let enrollments = Interleaved {
        inner: Arc::clone(&storage.enrollments),
        hook: Hook::CancelAfterRead,
    };
    let service = ProgressService::new(
        Clock::fixed(fixed_now()),
        Arc::clone(&storage.courses),
        Arc::new(enrollments),
        Arc::clone(&storage.ledger),
        Arc::clone(&storage.progress),
    );

    let err = service
        .complete_lesson(&c.student, c.enrollment.id(), c.lessons[0])
        .await
        .unwrap_err();
    assert!(matches!(err, LmsError::InvalidState(_)));

    let record = storage
        .ledger
        .get_record(c.enrollment.id(), c.lessons[0])
        .await
        .unwrap();
    assert_eq!(record, None);
    let stored = storage
        .enrollments
        .get_enrollment(c.enrollment.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), EnrollmentStatus::Cancelled);
    assert_eq!(stored.progress(), Progress::ZERO);
}

#[tokio::test]
async fn completion_rejected_after_concurrent_cancel_in_memory() {
    completion_rejected_after_concurrent_cancel(Storage::in_memory()).await;
}

#[tokio::test]
async fn completion_rejected_after_concurrent_cancel_sqlite() {
    let storage = Storage::sqlite("sqlite:file:memdb_stale_cancel?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    completion_rejected_after_concurrent_cancel(storage).await;
}
