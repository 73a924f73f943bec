use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::access::{EnrollmentOwnership, EnrollmentScope};
use lms_core::model::{
    Course, CourseId, Enrollment, EnrollmentError, EnrollmentId, Lesson, LessonId, ProgressRecord,
    ProgressUpdate, Role, Upserted, User, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored enrollment refused the write, e.g. it was cancelled.
    #[error(transparent)]
    Rejected(#[from] EnrollmentError),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Insert shape for a user; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

/// Insert shape for a course; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewCourseRecord {
    pub instructor_id: UserId,
    pub title: String,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a lesson; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewLessonRecord {
    pub course_id: CourseId,
    pub title: String,
    pub position: u32,
    pub is_preview: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for an enrollment; it always starts active at 0%.
#[derive(Debug, Clone, Copy)]
pub struct NewEnrollmentRecord {
    pub student_id: UserId,
    pub course_id: CourseId,
    pub enrolled_at: DateTime<Utc>,
}

/// What one transactional lesson completion did.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonCompletion {
    pub enrollment: Enrollment,
    /// Ledger row after the call, tagged with whether this call created it.
    pub record: Upserted<ProgressRecord>,
    /// `None` when the lesson was already completed and nothing was written.
    pub update: Option<ProgressUpdate>,
}

impl LessonCompletion {
    #[must_use]
    pub fn was_noop(&self) -> bool {
        self.update.is_none()
    }
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the email is taken.
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserId, StorageError>;

    /// Fetch a user by ID. Returns `Ok(None)` when missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError>;

    /// Number of users per role, for every role.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_users_by_role(&self) -> Result<Vec<(Role, u64)>, StorageError>;
}

/// Read side of the lesson catalog, plus the inserts used by seeding and tests.
#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// Insert a course and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the instructor does not exist.
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError>;

    /// Insert a lesson and return its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn insert_lesson(&self, lesson: NewLessonRecord) -> Result<LessonId, StorageError>;

    /// Fetch a course by ID. Returns `Ok(None)` when missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;

    /// Fetch a lesson by ID. Returns `Ok(None)` when missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError>;

    /// Lessons of a course ordered by `(position, id)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<Lesson>, StorageError>;

    /// Courses taught by an instructor, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn courses_for_instructor(
        &self,
        instructor_id: UserId,
    ) -> Result<Vec<Course>, StorageError>;

    /// Total number of courses.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_courses(&self) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Create an active enrollment at 0%.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the (student, course) pair is
    /// already enrolled, `StorageError::NotFound` if either side is missing.
    async fn insert_enrollment(
        &self,
        enrollment: NewEnrollmentRecord,
    ) -> Result<Enrollment, StorageError>;

    /// Fetch an enrollment by ID. Returns `Ok(None)` when missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StorageError>;

    /// Fetch the enrollment of a student in a course, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn find_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Enrollments visible under `scope`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_enrollments(
        &self,
        scope: EnrollmentScope,
    ) -> Result<Vec<Enrollment>, StorageError>;

    /// Set the status to cancelled, leaving progress and `completed_at` as
    /// stored. Returns false if the enrollment already was cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist.
    async fn cancel_enrollment(&self, id: EnrollmentId) -> Result<bool, StorageError>;
}

/// Per-lesson completion markers.
#[async_trait]
pub trait ProgressLedger: Send + Sync {
    /// Find the (enrollment, lesson) row or insert a not-completed one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment or lesson is missing.
    async fn find_or_insert(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<Upserted<ProgressRecord>, StorageError>;

    /// Fetch the (enrollment, lesson) row without creating it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_record(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<Option<ProgressRecord>, StorageError>;

    /// All rows of an enrollment ordered by lesson id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn records_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<ProgressRecord>, StorageError>;
}

/// Atomic lesson completion: ledger upsert, recount and enrollment recompute
/// commit together or not at all.
#[async_trait]
pub trait ProgressPersistence: Send + Sync {
    /// Mark `lesson_id` completed for `enrollment_id` and recompute the
    /// enrollment from current totals. Repeated calls are no-ops.
    ///
    /// The caller is responsible for checking that the lesson belongs to the
    /// enrollment's course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment or lesson is missing,
    /// `StorageError::Rejected` if the enrollment is cancelled. Nothing is
    /// written in either case.
    async fn complete_lesson(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Result<LessonCompletion, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    users: BTreeMap<UserId, User>,
    courses: BTreeMap<CourseId, Course>,
    lessons: BTreeMap<LessonId, Lesson>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    ledger: HashMap<(EnrollmentId, LessonId), ProgressRecord>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ownership(&self, enrollment: &Enrollment) -> Option<EnrollmentOwnership> {
        self.courses
            .get(&enrollment.course_id())
            .map(|course| EnrollmentOwnership {
                student_id: enrollment.student_id(),
                instructor_id: course.instructor_id(),
            })
    }

    fn find_or_insert(
        &mut self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<Upserted<ProgressRecord>, StorageError> {
        if !self.enrollments.contains_key(&enrollment_id) || !self.lessons.contains_key(&lesson_id)
        {
            return Err(StorageError::NotFound);
        }
        if let Some(existing) = self.ledger.get(&(enrollment_id, lesson_id)) {
            return Ok(Upserted::Found(existing.clone()));
        }
        let record = ProgressRecord::new(enrollment_id, lesson_id);
        self.ledger.insert((enrollment_id, lesson_id), record.clone());
        Ok(Upserted::Created(record))
    }

    fn count_lessons(&self, course_id: CourseId) -> usize {
        self.lessons
            .values()
            .filter(|lesson| lesson.belongs_to(course_id))
            .count()
    }

    fn count_completed(&self, enrollment_id: EnrollmentId) -> usize {
        self.ledger
            .values()
            .filter(|r| r.enrollment_id() == enrollment_id && r.is_completed())
            .count()
    }
}

fn count_u32(n: usize) -> Result<u32, StorageError> {
    u32::try_from(n).map_err(|_| StorageError::Serialization("count overflow".into()))
}

fn newest_first(enrollments: &mut [Enrollment]) {
    enrollments.sort_by(|a, b| {
        b.enrolled_at()
            .cmp(&a.enrolled_at())
            .then_with(|| b.id().cmp(&a.id()))
    });
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// One mutex guards all tables, so every trait call is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserId, StorageError> {
        let mut guard = self.lock()?;
        if guard.users.values().any(|u| u.email() == user.email.trim()) {
            return Err(StorageError::Conflict);
        }
        let id = UserId::new(guard.allocate_id());
        let user = User::new(id, user.email, user.display_name, user.role)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.users.insert(id, user);
        Ok(id)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn count_users_by_role(&self) -> Result<Vec<(Role, u64)>, StorageError> {
        let guard = self.lock()?;
        Ok(Role::ALL
            .iter()
            .map(|role| {
                let n = guard.users.values().filter(|u| u.role() == *role).count();
                (*role, n as u64)
            })
            .collect())
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError> {
        let mut guard = self.lock()?;
        if !guard.users.contains_key(&course.instructor_id) {
            return Err(StorageError::NotFound);
        }
        let id = CourseId::new(guard.allocate_id());
        let course = Course::new(
            id,
            course.instructor_id,
            course.title,
            course.is_published,
            course.created_at,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.courses.insert(id, course);
        Ok(id)
    }

    async fn insert_lesson(&self, lesson: NewLessonRecord) -> Result<LessonId, StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&lesson.course_id) {
            return Err(StorageError::NotFound);
        }
        let id = LessonId::new(guard.allocate_id());
        let lesson = Lesson::new(
            id,
            lesson.course_id,
            lesson.title,
            lesson.position,
            lesson.is_preview,
            lesson.created_at,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.lessons.insert(id, lesson);
        Ok(id)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        Ok(self.lock()?.courses.get(&id).cloned())
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        Ok(self.lock()?.lessons.get(&id).cloned())
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<Lesson>, StorageError> {
        let guard = self.lock()?;
        let mut lessons: Vec<Lesson> = guard
            .lessons
            .values()
            .filter(|lesson| lesson.belongs_to(course_id))
            .cloned()
            .collect();
        lessons.sort_by_key(Lesson::catalog_key);
        Ok(lessons)
    }

    async fn courses_for_instructor(
        &self,
        instructor_id: UserId,
    ) -> Result<Vec<Course>, StorageError> {
        let guard = self.lock()?;
        let mut courses: Vec<Course> = guard
            .courses
            .values()
            .filter(|c| c.instructor_id() == instructor_id)
            .cloned()
            .collect();
        courses.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(courses)
    }

    async fn count_courses(&self) -> Result<u64, StorageError> {
        Ok(self.lock()?.courses.len() as u64)
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn insert_enrollment(
        &self,
        enrollment: NewEnrollmentRecord,
    ) -> Result<Enrollment, StorageError> {
        let mut guard = self.lock()?;
        if !guard.users.contains_key(&enrollment.student_id)
            || !guard.courses.contains_key(&enrollment.course_id)
        {
            return Err(StorageError::NotFound);
        }
        let duplicate = guard.enrollments.values().any(|e| {
            e.student_id() == enrollment.student_id && e.course_id() == enrollment.course_id
        });
        if duplicate {
            return Err(StorageError::Conflict);
        }
        let id = EnrollmentId::new(guard.allocate_id());
        let created = Enrollment::new(
            id,
            enrollment.student_id,
            enrollment.course_id,
            enrollment.enrolled_at,
        );
        guard.enrollments.insert(id, created.clone());
        Ok(created)
    }

    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StorageError> {
        Ok(self.lock()?.enrollments.get(&id).cloned())
    }

    async fn find_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .enrollments
            .values()
            .find(|e| e.student_id() == student_id && e.course_id() == course_id)
            .cloned())
    }

    async fn list_enrollments(
        &self,
        scope: EnrollmentScope,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self.lock()?;
        let mut out: Vec<Enrollment> = guard
            .enrollments
            .values()
            .filter(|e| guard.ownership(e).is_some_and(|o| scope.admits(&o)))
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }

    async fn cancel_enrollment(&self, id: EnrollmentId) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        guard
            .enrollments
            .get_mut(&id)
            .map(Enrollment::cancel)
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ProgressLedger for InMemoryRepository {
    async fn find_or_insert(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<Upserted<ProgressRecord>, StorageError> {
        self.lock()?.find_or_insert(enrollment_id, lesson_id)
    }

    async fn get_record(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        Ok(self.lock()?.ledger.get(&(enrollment_id, lesson_id)).cloned())
    }

    async fn records_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let guard = self.lock()?;
        let mut out: Vec<ProgressRecord> = guard
            .ledger
            .values()
            .filter(|r| r.enrollment_id() == enrollment_id)
            .cloned()
            .collect();
        out.sort_by_key(ProgressRecord::lesson_id);
        Ok(out)
    }
}

#[async_trait]
impl ProgressPersistence for InMemoryRepository {
    async fn complete_lesson(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Result<LessonCompletion, StorageError> {
        let mut guard = self.lock()?;
        let mut enrollment = guard
            .enrollments
            .get(&enrollment_id)
            .cloned()
            .ok_or(StorageError::NotFound)?;
        enrollment.ensure_accepts_progress()?;

        let entry = guard.find_or_insert(enrollment_id, lesson_id)?;
        if entry.get().is_completed() {
            return Ok(LessonCompletion {
                enrollment,
                record: entry,
                update: None,
            });
        }

        let record = entry.map(|mut r| {
            r.mark_completed(at);
            r
        });
        guard.ledger.insert((enrollment_id, lesson_id), record.get().clone());

        let total = count_u32(guard.count_lessons(enrollment.course_id()))?;
        let completed = count_u32(guard.count_completed(enrollment_id))?;
        let update = enrollment.apply_completion_counts(completed, total, at);
        guard.enrollments.insert(enrollment_id, enrollment.clone());

        Ok(LessonCompletion {
            enrollment,
            record,
            update: Some(update),
        })
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserRepository>,
    pub courses: Arc<dyn CourseRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub ledger: Arc<dyn ProgressLedger>,
    pub progress: Arc<dyn ProgressPersistence>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            users: Arc::new(repo.clone()),
            courses: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            ledger: Arc::new(repo.clone()),
            progress: Arc::new(repo),
        }
    }
}
