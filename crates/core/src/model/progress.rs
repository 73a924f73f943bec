use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{EnrollmentId, LessonId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressRecordError {
    #[error("completed lesson progress without completed_at")]
    MissingCompletedAt,
}

/// Per-lesson completion marker scoped to one enrollment.
///
/// `is_completed` only ever moves from false to true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    enrollment_id: EnrollmentId,
    lesson_id: LessonId,
    is_completed: bool,
    completed_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// A not-yet-completed marker.
    #[must_use]
    pub fn new(enrollment_id: EnrollmentId, lesson_id: LessonId) -> Self {
        Self {
            enrollment_id,
            lesson_id,
            is_completed: false,
            completed_at: None,
        }
    }

    /// Rehydrate a ledger row.
    ///
    /// # Errors
    ///
    /// Returns `ProgressRecordError::MissingCompletedAt` if a completed row has
    /// no timestamp.
    pub fn from_persisted(
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
        is_completed: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ProgressRecordError> {
        if is_completed && completed_at.is_none() {
            return Err(ProgressRecordError::MissingCompletedAt);
        }
        Ok(Self {
            enrollment_id,
            lesson_id,
            is_completed,
            completed_at,
        })
    }

    #[must_use]
    pub fn enrollment_id(&self) -> EnrollmentId {
        self.enrollment_id
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Mark the lesson completed. Returns false (and changes nothing) if it already was.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_completed {
            return false;
        }
        self.is_completed = true;
        self.completed_at = Some(at);
        true
    }
}

/// Result of a find-or-insert against a uniquely keyed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted<T> {
    Found(T),
    Created(T),
}

impl<T> Upserted<T> {
    #[must_use]
    pub fn was_created(&self) -> bool {
        matches!(self, Upserted::Created(_))
    }

    #[must_use]
    pub fn get(&self) -> &T {
        match self {
            Upserted::Found(v) | Upserted::Created(v) => v,
        }
    }

    /// Transform the payload while keeping the found/created tag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Upserted<U> {
        match self {
            Upserted::Found(v) => Upserted::Found(f(v)),
            Upserted::Created(v) => Upserted::Created(f(v)),
        }
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Upserted::Found(v) | Upserted::Created(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn completion_is_monotonic_and_stamped_once() {
        let mut record = ProgressRecord::new(EnrollmentId::new(1), LessonId::new(2));
        assert!(!record.is_completed());

        assert!(record.mark_completed(fixed_now()));
        assert!(!record.mark_completed(fixed_now() + Duration::hours(2)));
        assert!(record.is_completed());
        assert_eq!(record.completed_at(), Some(fixed_now()));
    }

    #[test]
    fn persisted_completion_requires_timestamp() {
        let err = ProgressRecord::from_persisted(EnrollmentId::new(1), LessonId::new(1), true, None)
            .unwrap_err();
        assert_eq!(err, ProgressRecordError::MissingCompletedAt);
    }

    #[test]
    fn upserted_reports_origin() {
        let created = Upserted::Created(5);
        let found = Upserted::Found(5);
        assert!(created.was_created());
        assert!(!found.was_created());
        assert_eq!(found.into_inner(), 5);
    }
}
