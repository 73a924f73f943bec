use chrono::{DateTime, Utc};
use lms_core::model::{EnrollmentId, LessonId, ProgressRecord, Upserted};
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::enrollment_repo::{fetch_enrollment, write_enrollment};
use super::mapping::{count_u32, db_err, id_i64, map_progress_row, ser};
use crate::repository::{LessonCompletion, ProgressLedger, ProgressPersistence, StorageError};

fn conn_err(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    enrollment_id: i64,
    lesson_id: i64,
) -> Result<Option<ProgressRecord>, StorageError> {
    let row = sqlx::query(
        r"
        SELECT enrollment_id, lesson_id, is_completed, completed_at
        FROM lesson_progress
        WHERE enrollment_id = ?1 AND lesson_id = ?2
        ",
    )
    .bind(enrollment_id)
    .bind(lesson_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(conn_err)?;

    row.as_ref().map(map_progress_row).transpose()
}

/// Insert-if-absent on the `(enrollment_id, lesson_id)` key, then read back.
async fn find_or_insert_on(
    conn: &mut SqliteConnection,
    enrollment_id: EnrollmentId,
    lesson_id: LessonId,
) -> Result<Upserted<ProgressRecord>, StorageError> {
    let enrollment = id_i64("enrollment_id", enrollment_id.value())?;
    let lesson = id_i64("lesson_id", lesson_id.value())?;

    let res = sqlx::query(
        r"
        INSERT INTO lesson_progress (enrollment_id, lesson_id, is_completed, completed_at)
        VALUES (?1, ?2, 0, NULL)
        ON CONFLICT(enrollment_id, lesson_id) DO NOTHING
        ",
    )
    .bind(enrollment)
    .bind(lesson)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    let record = fetch_record(conn, enrollment, lesson)
        .await?
        .ok_or(StorageError::NotFound)?;

    if res.rows_affected() == 1 {
        Ok(Upserted::Created(record))
    } else {
        Ok(Upserted::Found(record))
    }
}

#[async_trait::async_trait]
impl ProgressLedger for SqliteRepository {
    async fn find_or_insert(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<Upserted<ProgressRecord>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(conn_err)?;
        find_or_insert_on(&mut *conn, enrollment_id, lesson_id).await
    }

    async fn get_record(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(conn_err)?;
        fetch_record(
            &mut *conn,
            id_i64("enrollment_id", enrollment_id.value())?,
            id_i64("lesson_id", lesson_id.value())?,
        )
        .await
    }

    async fn records_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT enrollment_id, lesson_id, is_completed, completed_at
            FROM lesson_progress
            WHERE enrollment_id = ?1
            ORDER BY lesson_id ASC
            ",
        )
        .bind(id_i64("enrollment_id", enrollment_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn_err)?;

        rows.iter().map(map_progress_row).collect()
    }
}

#[async_trait::async_trait]
impl ProgressPersistence for SqliteRepository {
    async fn complete_lesson(
        &self,
        enrollment_id: EnrollmentId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Result<LessonCompletion, StorageError> {
        let enrollment_key = id_i64("enrollment_id", enrollment_id.value())?;
        let lesson_key = id_i64("lesson_id", lesson_id.value())?;

        let mut tx = self.pool.begin().await.map_err(conn_err)?;

        // Grab the write lock before any read; concurrent completions queue here.
        let locked = sqlx::query(
            "UPDATE enrollments SET progress_hundredths = progress_hundredths WHERE id = ?1",
        )
        .bind(enrollment_key)
        .execute(&mut *tx)
        .await
        .map_err(conn_err)?;
        if locked.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        let mut enrollment = fetch_enrollment(&mut *tx, enrollment_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        enrollment.ensure_accepts_progress()?;

        let entry = find_or_insert_on(&mut *tx, enrollment_id, lesson_id).await?;
        if entry.get().is_completed() {
            tx.commit().await.map_err(conn_err)?;
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

        sqlx::query(
            r"
            UPDATE lesson_progress
            SET is_completed = 1, completed_at = ?3
            WHERE enrollment_id = ?1 AND lesson_id = ?2
            ",
        )
        .bind(enrollment_key)
        .bind(lesson_key)
        .bind(record.get().completed_at())
        .execute(&mut *tx)
        .await
        .map_err(conn_err)?;

        let counts = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM lessons WHERE course_id = ?1) AS total,
                (SELECT COUNT(*) FROM lesson_progress
                    WHERE enrollment_id = ?2 AND is_completed = 1) AS completed
            ",
        )
        .bind(id_i64("course_id", enrollment.course_id().value())?)
        .bind(enrollment_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(conn_err)?;
        let total = count_u32("total", counts.try_get("total").map_err(ser)?)?;
        let completed = count_u32("completed", counts.try_get("completed").map_err(ser)?)?;

        let update = enrollment.apply_completion_counts(completed, total, at);
        write_enrollment(&mut *tx, &enrollment).await?;

        tx.commit().await.map_err(conn_err)?;

        Ok(LessonCompletion {
            enrollment,
            record,
            update: Some(update),
        })
    }
}
