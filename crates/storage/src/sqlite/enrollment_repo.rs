use lms_core::access::EnrollmentScope;
use lms_core::model::{CourseId, Enrollment, EnrollmentId, UserId};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{db_err, enrollment_id_from_i64, id_i64, map_enrollment_row};
use crate::repository::{EnrollmentRepository, NewEnrollmentRecord, StorageError};

const ENROLLMENT_COLUMNS: &str =
    "e.id, e.student_id, e.course_id, e.status, e.progress_hundredths, e.enrolled_at, e.completed_at";

pub(super) async fn fetch_enrollment(
    conn: &mut SqliteConnection,
    id: EnrollmentId,
) -> Result<Option<Enrollment>, StorageError> {
    let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments e WHERE e.id = ?1");
    let row = sqlx::query(&sql)
        .bind(id_i64("enrollment_id", id.value())?)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    row.as_ref().map(map_enrollment_row).transpose()
}

pub(super) async fn write_enrollment(
    conn: &mut SqliteConnection,
    enrollment: &Enrollment,
) -> Result<(), StorageError> {
    let res = sqlx::query(
        r"
        UPDATE enrollments
        SET status = ?2, progress_hundredths = ?3, completed_at = ?4
        WHERE id = ?1
        ",
    )
    .bind(id_i64("enrollment_id", enrollment.id().value())?)
    .bind(enrollment.status().as_str())
    .bind(i64::from(enrollment.progress().hundredths()))
    .bind(enrollment.completed_at())
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn insert_enrollment(
        &self,
        enrollment: NewEnrollmentRecord,
    ) -> Result<Enrollment, StorageError> {
        let created = Enrollment::new(
            EnrollmentId::new(0),
            enrollment.student_id,
            enrollment.course_id,
            enrollment.enrolled_at,
        );

        let res = sqlx::query(
            r"
            INSERT INTO enrollments (student_id, course_id, status, progress_hundredths, enrolled_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("student_id", created.student_id().value())?)
        .bind(id_i64("course_id", created.course_id().value())?)
        .bind(created.status().as_str())
        .bind(i64::from(created.progress().hundredths()))
        .bind(created.enrolled_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(created.with_id(enrollment_id_from_i64(res.last_insert_rowid())?))
    }

    async fn get_enrollment(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StorageError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        fetch_enrollment(&mut *conn, id).await
    }

    async fn find_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments e WHERE e.student_id = ?1 AND e.course_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", student_id.value())?)
            .bind(id_i64("course_id", course_id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_enrollment_row).transpose()
    }

    async fn list_enrollments(
        &self,
        scope: EnrollmentScope,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let (filter, bound) = match scope {
            EnrollmentScope::All => ("1 = 1", None),
            EnrollmentScope::InstructedBy(id) => ("c.instructor_id = ?1", Some(id)),
            EnrollmentScope::StudentIs(id) => ("e.student_id = ?1", Some(id)),
        };
        let sql = format!(
            r"
            SELECT {ENROLLMENT_COLUMNS}
            FROM enrollments e
            JOIN courses c ON c.id = e.course_id
            WHERE {filter}
            ORDER BY e.enrolled_at DESC, e.id DESC
            "
        );

        let mut query = sqlx::query(&sql);
        if let Some(id) = bound {
            query = query.bind(id_i64("user_id", id.value())?);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        rows.iter().map(map_enrollment_row).collect()
    }

    async fn cancel_enrollment(&self, id: EnrollmentId) -> Result<bool, StorageError> {
        let key = id_i64("enrollment_id", id.value())?;
        let res = sqlx::query(
            "UPDATE enrollments SET status = 'cancelled' WHERE id = ?1 AND status <> 'cancelled'",
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 1 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM enrollments WHERE id = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound),
        }
    }
}
