//! JSON handlers. Each resolves the caller, delegates to a service and maps
//! the domain result into a response view.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use lms_core::model::{
    CourseId, Enrollment, EnrollmentId, EnrollmentStatus, Lesson, LessonId, ProgressRecord,
    UserId,
};
use serde::{Deserialize, Serialize};
use services::{AdminSummary, InstructorSummary, RecentEnrollment, StudentSummary};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::Caller;

const LESSON_COMPLETED: &str = "Lesson marked as completed";

//
// ─── VIEWS ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
pub struct EnrollmentView {
    pub id: EnrollmentId,
    pub student_id: UserId,
    pub course_id: CourseId,
    pub status: EnrollmentStatus,
    pub progress: f64,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Enrollment> for EnrollmentView {
    fn from(e: &Enrollment) -> Self {
        Self {
            id: e.id(),
            student_id: e.student_id(),
            course_id: e.course_id(),
            status: e.status(),
            progress: e.progress().as_f64(),
            enrolled_at: e.enrolled_at(),
            completed_at: e.completed_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressRecordView {
    pub enrollment_id: EnrollmentId,
    pub lesson_id: LessonId,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ProgressRecord> for ProgressRecordView {
    fn from(r: &ProgressRecord) -> Self {
        Self {
            enrollment_id: r.enrollment_id(),
            lesson_id: r.lesson_id(),
            is_completed: r.is_completed(),
            completed_at: r.completed_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LessonView {
    pub id: LessonId,
    pub course_id: CourseId,
    pub title: String,
    pub position: u32,
    pub is_preview: bool,
}

impl From<&Lesson> for LessonView {
    fn from(l: &Lesson) -> Self {
        Self {
            id: l.id(),
            course_id: l.course_id(),
            title: l.title().to_owned(),
            position: l.position(),
            is_preview: l.is_preview(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompleteLessonResponse {
    pub message: &'static str,
    pub progress: f64,
}

#[derive(Debug, Serialize)]
pub struct CourseProgressResponse {
    pub message: &'static str,
    pub course_progress: f64,
}

#[derive(Debug, Serialize)]
pub struct LessonStatusResponse {
    pub is_completed: bool,
}

#[derive(Debug, Serialize)]
pub struct AdminDashboardView {
    pub total_users: u64,
    pub users_by_role: BTreeMap<&'static str, u64>,
    pub courses: u64,
    pub enrollments: u64,
    pub enrollments_by_status: BTreeMap<&'static str, u64>,
}

impl From<AdminSummary> for AdminDashboardView {
    fn from(s: AdminSummary) -> Self {
        Self {
            total_users: s.total_users,
            users_by_role: s
                .users_by_role
                .into_iter()
                .map(|(role, n)| (role.as_str(), n))
                .collect(),
            courses: s.courses,
            enrollments: s.enrollments,
            enrollments_by_status: s
                .enrollments_by_status
                .into_iter()
                .map(|(status, n)| (status.as_str(), n))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InstructorDashboardView {
    pub courses: u64,
    pub students: u64,
    pub enrollments: u64,
    pub average_progress: f64,
}

impl From<InstructorSummary> for InstructorDashboardView {
    fn from(s: InstructorSummary) -> Self {
        Self {
            courses: s.courses,
            students: s.students,
            enrollments: s.enrollments,
            average_progress: s.average_progress.as_f64(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecentEnrollmentView {
    pub enrollment_id: EnrollmentId,
    pub course_id: CourseId,
    pub title: String,
    pub status: EnrollmentStatus,
    pub progress: f64,
    pub enrolled_at: DateTime<Utc>,
}

impl From<RecentEnrollment> for RecentEnrollmentView {
    fn from(r: RecentEnrollment) -> Self {
        Self {
            enrollment_id: r.enrollment_id,
            course_id: r.course_id,
            title: r.course_title,
            status: r.status,
            progress: r.progress.as_f64(),
            enrolled_at: r.enrolled_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentDashboardView {
    pub enrolled: u64,
    pub active: u64,
    pub completed: u64,
    pub average_progress: f64,
    pub recent: Vec<RecentEnrollmentView>,
}

impl From<StudentSummary> for StudentDashboardView {
    fn from(s: StudentSummary) -> Self {
        Self {
            enrolled: s.enrolled,
            active: s.active,
            completed: s.completed,
            average_progress: s.average_progress.as_f64(),
            recent: s.recent.into_iter().map(Into::into).collect(),
        }
    }
}

//
// ─── REQUESTS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
pub struct CompleteLessonRequest {
    pub lesson_id: Option<LessonId>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEnrollmentRequest {
    pub course_id: CourseId,
    pub student_id: Option<UserId>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

//
// ─── HANDLERS ──────────────────────────────────────────────────────────────────
//

pub async fn health() -> &'static str {
    "OK"
}

/// POST /api/enrollments/{id}/complete_lesson
pub async fn complete_lesson(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(enrollment_id): Path<EnrollmentId>,
    body: Result<Json<CompleteLessonRequest>, JsonRejection>,
) -> Result<Json<CompleteLessonResponse>, ApiError> {
    let lesson_id = json_body(body)?
        .lesson_id
        .ok_or_else(|| ApiError::BadRequest("lesson_id is required".into()))?;

    let done = state
        .services
        .progress()
        .complete_lesson(&principal, enrollment_id, lesson_id)
        .await?;
    Ok(Json(CompleteLessonResponse {
        message: LESSON_COMPLETED,
        progress: done.enrollment.progress().as_f64(),
    }))
}

/// GET /api/lessons/{id}/progress
pub async fn lesson_progress(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(lesson_id): Path<LessonId>,
) -> Result<Json<LessonStatusResponse>, ApiError> {
    let is_completed = state
        .services
        .progress()
        .lesson_status(&principal, lesson_id)
        .await?;
    Ok(Json(LessonStatusResponse { is_completed }))
}

/// POST /api/lessons/{id}/complete
pub async fn complete_lesson_for_caller(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(lesson_id): Path<LessonId>,
) -> Result<Json<CourseProgressResponse>, ApiError> {
    let done = state
        .services
        .progress()
        .complete_lesson_for_caller(&principal, lesson_id)
        .await?;
    Ok(Json(CourseProgressResponse {
        message: LESSON_COMPLETED,
        course_progress: done.enrollment.progress().as_f64(),
    }))
}

/// POST /api/enrollments
pub async fn create_enrollment(
    State(state): State<AppState>,
    Caller(principal): Caller,
    body: Result<Json<CreateEnrollmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnrollmentView>), ApiError> {
    let request = json_body(body)?;
    let enrollment = state
        .services
        .enrollments()
        .enroll(&principal, request.course_id, request.student_id)
        .await?;
    Ok((StatusCode::CREATED, Json(EnrollmentView::from(&enrollment))))
}

/// GET /api/enrollments
pub async fn list_enrollments(
    State(state): State<AppState>,
    Caller(principal): Caller,
) -> Result<Json<Vec<EnrollmentView>>, ApiError> {
    let enrollments = state.services.enrollments().list(&principal).await?;
    Ok(Json(enrollments.iter().map(EnrollmentView::from).collect()))
}

/// GET /api/enrollments/{id}
pub async fn get_enrollment(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(enrollment_id): Path<EnrollmentId>,
) -> Result<Json<EnrollmentView>, ApiError> {
    let enrollment = state
        .services
        .enrollments()
        .get(&principal, enrollment_id)
        .await?;
    Ok(Json(EnrollmentView::from(&enrollment)))
}

/// GET /api/enrollments/{id}/progress
pub async fn enrollment_progress(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(enrollment_id): Path<EnrollmentId>,
) -> Result<Json<Vec<ProgressRecordView>>, ApiError> {
    let records = state
        .services
        .progress()
        .enrollment_progress(&principal, enrollment_id)
        .await?;
    Ok(Json(records.iter().map(ProgressRecordView::from).collect()))
}

/// POST /api/enrollments/{id}/cancel
pub async fn cancel_enrollment(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(enrollment_id): Path<EnrollmentId>,
) -> Result<Json<EnrollmentView>, ApiError> {
    let enrollment = state
        .services
        .enrollments()
        .cancel(&principal, enrollment_id)
        .await?;
    Ok(Json(EnrollmentView::from(&enrollment)))
}

/// GET /api/courses/{id}/lessons
pub async fn course_lessons(
    State(state): State<AppState>,
    Caller(_): Caller,
    Path(course_id): Path<CourseId>,
) -> Result<Json<Vec<LessonView>>, ApiError> {
    let lessons = state.services.enrollments().course_lessons(course_id).await?;
    Ok(Json(lessons.iter().map(LessonView::from).collect()))
}

pub async fn admin_dashboard(
    State(state): State<AppState>,
    Caller(principal): Caller,
) -> Result<Json<AdminDashboardView>, ApiError> {
    let summary = state.services.dashboards().admin_summary(&principal).await?;
    Ok(Json(summary.into()))
}

pub async fn instructor_dashboard(
    State(state): State<AppState>,
    Caller(principal): Caller,
) -> Result<Json<InstructorDashboardView>, ApiError> {
    let summary = state
        .services
        .dashboards()
        .instructor_summary(&principal)
        .await?;
    Ok(Json(summary.into()))
}

pub async fn student_dashboard(
    State(state): State<AppState>,
    Caller(principal): Caller,
) -> Result<Json<StudentDashboardView>, ApiError> {
    let summary = state
        .services
        .dashboards()
        .student_summary(&principal)
        .await?;
    Ok(Json(summary.into()))
}
