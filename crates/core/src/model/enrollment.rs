use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, EnrollmentId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnrollmentError {
    #[error("progress must be between 0 and 10000 hundredths, got {0}")]
    ProgressOutOfRange(u32),

    #[error("unknown enrollment status: {0}")]
    UnknownStatus(String),

    #[error("enrollment is cancelled")]
    Cancelled,

    #[error("invalid persisted enrollment: {0}")]
    InvalidPersistedState(String),
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle of an enrollment.
///
/// `Active` is the initial state. `Completed` is reached only through a
/// progress recompute that lands on exactly 100%. `Cancelled` is set by an
/// administrative action and is never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 3] = [
        EnrollmentStatus::Active,
        EnrollmentStatus::Completed,
        EnrollmentStatus::Cancelled,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = EnrollmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "cancelled" => Ok(EnrollmentStatus::Cancelled),
            other => Err(EnrollmentError::UnknownStatus(other.to_owned())),
        }
    }
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// Course completion percentage with two-decimal precision.
///
/// Stored as integer hundredths of a percent (`0..=10_000`) so that "exactly
/// 100" is an integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Progress(u16);

impl Progress {
    pub const ZERO: Progress = Progress(0);
    pub const COMPLETE: Progress = Progress(10_000);

    /// Rehydrate from hundredths of a percent.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::ProgressOutOfRange` above 10 000.
    pub fn from_hundredths(hundredths: u32) -> Result<Self, EnrollmentError> {
        if hundredths > 10_000 {
            return Err(EnrollmentError::ProgressOutOfRange(hundredths));
        }
        u16::try_from(hundredths)
            .map(Self)
            .map_err(|_| EnrollmentError::ProgressOutOfRange(hundredths))
    }

    /// `round(100 * completed / total, 2)`, rounding half up on the hundredth.
    ///
    /// Returns `None` when `total` is zero. `completed` is capped at `total`.
    #[must_use]
    pub fn from_counts(completed: u32, total: u32) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let completed = u64::from(completed.min(total));
        let total = u64::from(total);
        let hundredths = (completed * 20_000 + total) / (2 * total);
        // completed <= total keeps this within 0..=10_000
        u16::try_from(hundredths).ok().map(Self)
    }

    /// Arithmetic mean, rounded half up on the hundredth. Empty input is 0.
    #[must_use]
    pub fn average(values: impl IntoIterator<Item = Progress>) -> Self {
        let (sum, n) = values
            .into_iter()
            .fold((0_u64, 0_u64), |(sum, n), p| (sum + u64::from(p.0), n + 1));
        if n == 0 {
            return Self::ZERO;
        }
        let mean = (sum * 2 + n) / (2 * n);
        // a mean never exceeds its largest input
        u16::try_from(mean).map_or(Self::COMPLETE, Self)
    }

    #[must_use]
    pub fn hundredths(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn is_complete(self) -> bool {
        self == Self::COMPLETE
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

//
// ─── ENROLLMENT ────────────────────────────────────────────────────────────────
//

/// Outcome of applying fresh ledger counts to an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub previous: Progress,
    pub current: Progress,
    pub became_completed: bool,
}

impl ProgressUpdate {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.previous == self.current && !self.became_completed
    }
}

/// A student's registration in a course, carrying cached progress and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    id: EnrollmentId,
    student_id: UserId,
    course_id: CourseId,
    status: EnrollmentStatus,
    progress: Progress,
    enrolled_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    /// A fresh, active enrollment at 0%.
    #[must_use]
    pub fn new(
        id: EnrollmentId,
        student_id: UserId,
        course_id: CourseId,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            course_id,
            status: EnrollmentStatus::Active,
            progress: Progress::ZERO,
            enrolled_at,
            completed_at: None,
        }
    }

    /// Rehydrate an enrollment from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::InvalidPersistedState` when a completed
    /// enrollment has no completion timestamp.
    pub fn from_persisted(
        id: EnrollmentId,
        student_id: UserId,
        course_id: CourseId,
        status: EnrollmentStatus,
        progress: Progress,
        enrolled_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, EnrollmentError> {
        if status == EnrollmentStatus::Completed && completed_at.is_none() {
            return Err(EnrollmentError::InvalidPersistedState(
                "completed enrollment without completed_at".into(),
            ));
        }
        Ok(Self {
            id,
            student_id,
            course_id,
            status,
            progress,
            enrolled_at,
            completed_at,
        })
    }

    /// Return a copy carrying the store-assigned id.
    #[must_use]
    pub fn with_id(mut self, id: EnrollmentId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> EnrollmentId {
        self.id
    }

    #[must_use]
    pub fn student_id(&self) -> UserId {
        self.student_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn status(&self) -> EnrollmentStatus {
        self.status
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress
    }

    #[must_use]
    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Lesson completions are only accepted while the enrollment is not cancelled.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::Cancelled` for cancelled enrollments.
    pub fn ensure_accepts_progress(&self) -> Result<(), EnrollmentError> {
        match self.status {
            EnrollmentStatus::Active | EnrollmentStatus::Completed => Ok(()),
            EnrollmentStatus::Cancelled => Err(EnrollmentError::Cancelled),
        }
    }

    /// Recompute cached progress from the current ledger counts.
    ///
    /// - `total == 0`: progress is left untouched.
    /// - Progress of exactly 100 moves an active enrollment to completed and
    ///   stamps `completed_at` once.
    /// - Completed enrollments never regress; cancelled ones are frozen.
    pub fn apply_completion_counts(
        &mut self,
        completed: u32,
        total: u32,
        at: DateTime<Utc>,
    ) -> ProgressUpdate {
        let previous = self.progress;
        let mut update = ProgressUpdate {
            previous,
            current: previous,
            became_completed: false,
        };

        if self.status == EnrollmentStatus::Cancelled {
            return update;
        }
        let Some(progress) = Progress::from_counts(completed, total) else {
            return update;
        };

        self.progress = progress;
        update.current = progress;

        if progress.is_complete() && self.status == EnrollmentStatus::Active {
            self.status = EnrollmentStatus::Completed;
            if self.completed_at.is_none() {
                self.completed_at = Some(at);
            }
            update.became_completed = true;
        }

        update
    }

    /// Move the enrollment to `Cancelled`. Returns false if it already was.
    pub fn cancel(&mut self) -> bool {
        if self.status == EnrollmentStatus::Cancelled {
            return false;
        }
        self.status = EnrollmentStatus::Cancelled;
        true
    }
}
