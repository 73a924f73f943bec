use lms_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, EnrollmentStatus, Lesson, LessonId, Progress,
    ProgressRecord, Role, User, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps driver errors, turning UNIQUE and FOREIGN KEY violations into the
/// storage taxonomy.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn enrollment_id_from_i64(v: i64) -> Result<EnrollmentId, StorageError> {
    Ok(EnrollmentId::new(i64_to_u64("enrollment_id", v)?))
}

pub(crate) fn count_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn map_user_row(row: &SqliteRow) -> Result<User, StorageError> {
    let role: Role = row
        .try_get::<String, _>("role")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    User::new(
        user_id_from_i64(row.try_get("id").map_err(ser)?)?,
        row.try_get::<String, _>("email").map_err(ser)?,
        row.try_get::<String, _>("display_name").map_err(ser)?,
        role,
    )
    .map_err(ser)
}

pub(crate) fn map_course_row(row: &SqliteRow) -> Result<Course, StorageError> {
    Course::new(
        course_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id_from_i64(row.try_get("instructor_id").map_err(ser)?)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<i64, _>("is_published").map_err(ser)? != 0,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    Lesson::new(
        lesson_id_from_i64(row.try_get("id").map_err(ser)?)?,
        course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        count_u32("position", row.try_get("position").map_err(ser)?)?,
        row.try_get::<i64, _>("is_preview").map_err(ser)? != 0,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_enrollment_row(row: &SqliteRow) -> Result<Enrollment, StorageError> {
    let status: EnrollmentStatus = row
        .try_get::<String, _>("status")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let hundredths = count_u32(
        "progress_hundredths",
        row.try_get("progress_hundredths").map_err(ser)?,
    )?;

    Enrollment::from_persisted(
        enrollment_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        status,
        Progress::from_hundredths(hundredths).map_err(ser)?,
        row.try_get("enrolled_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_progress_row(row: &SqliteRow) -> Result<ProgressRecord, StorageError> {
    ProgressRecord::from_persisted(
        enrollment_id_from_i64(row.try_get("enrollment_id").map_err(ser)?)?,
        lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
        row.try_get::<i64, _>("is_completed").map_err(ser)? != 0,
        row.try_get("completed_at").map_err(ser)?,
    )
    .map_err(ser)
}
