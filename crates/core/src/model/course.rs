use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{CourseId, LessonId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("lesson title cannot be empty")]
    EmptyLessonTitle,
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// A course owned by one instructor. Enrollments reference it, never own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    id: CourseId,
    instructor_id: UserId,
    title: String,
    is_published: bool,
    created_at: DateTime<Utc>,
}

impl Course {
    /// Creates a course.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyTitle` if the title is blank.
    pub fn new(
        id: CourseId,
        instructor_id: UserId,
        title: impl Into<String>,
        is_published: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(CourseError::EmptyTitle);
        }
        Ok(Self {
            id,
            instructor_id,
            title,
            is_published,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn instructor_id(&self) -> UserId {
        self.instructor_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.is_published
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// A lesson inside a course. Catalog order is `(position, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    id: LessonId,
    course_id: CourseId,
    title: String,
    position: u32,
    is_preview: bool,
    created_at: DateTime<Utc>,
}

impl Lesson {
    /// Creates a lesson.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyLessonTitle` if the title is blank.
    pub fn new(
        id: LessonId,
        course_id: CourseId,
        title: impl Into<String>,
        position: u32,
        is_preview: bool,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(CourseError::EmptyLessonTitle);
        }
        Ok(Self {
            id,
            course_id,
            title,
            position,
            is_preview,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn is_preview(&self) -> bool {
        self.is_preview
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true if this lesson belongs to `course_id`.
    #[must_use]
    pub fn belongs_to(&self, course_id: CourseId) -> bool {
        self.course_id == course_id
    }

    /// Sort key used by the catalog: position first, then id.
    #[must_use]
    pub fn catalog_key(&self) -> (u32, LessonId) {
        (self.position, self.id)
    }
}
