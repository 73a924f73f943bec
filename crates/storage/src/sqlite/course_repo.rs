use lms_core::model::{Course, CourseId, Lesson, LessonId, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    course_id_from_i64, db_err, id_i64, lesson_id_from_i64, map_course_row, map_lesson_row, ser,
};
use crate::repository::{CourseRepository, NewCourseRecord, NewLessonRecord, StorageError};

#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn insert_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO courses (instructor_id, title, is_published, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(id_i64("instructor_id", course.instructor_id.value())?)
        .bind(course.title.trim().to_owned())
        .bind(i64::from(course.is_published))
        .bind(course.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        course_id_from_i64(res.last_insert_rowid())
    }

    async fn insert_lesson(&self, lesson: NewLessonRecord) -> Result<LessonId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO lessons (course_id, title, position, is_preview, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("course_id", lesson.course_id.value())?)
        .bind(lesson.title.trim().to_owned())
        .bind(i64::from(lesson.position))
        .bind(i64::from(lesson.is_preview))
        .bind(lesson.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        lesson_id_from_i64(res.last_insert_rowid())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, instructor_id, title, is_published, created_at
            FROM courses WHERE id = ?1
            ",
        )
        .bind(id_i64("course_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_course_row).transpose()
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, course_id, title, position, is_preview, created_at
            FROM lessons WHERE id = ?1
            ",
        )
        .bind(id_i64("lesson_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_lesson_row).transpose()
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<Lesson>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, course_id, title, position, is_preview, created_at
            FROM lessons
            WHERE course_id = ?1
            ORDER BY position ASC, id ASC
            ",
        )
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        rows.iter().map(map_lesson_row).collect()
    }

    async fn courses_for_instructor(
        &self,
        instructor_id: UserId,
    ) -> Result<Vec<Course>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, instructor_id, title, is_published, created_at
            FROM courses
            WHERE instructor_id = ?1
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(id_i64("instructor_id", instructor_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        rows.iter().map(map_course_row).collect()
    }

    async fn count_courses(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM courses")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        u64::try_from(row.try_get::<i64, _>("n").map_err(ser)?).map_err(ser)
    }
}
