use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers;

/// Build the HTTP surface over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/enrollments",
            get(handlers::list_enrollments).post(handlers::create_enrollment),
        )
        .route("/api/enrollments/{id}", get(handlers::get_enrollment))
        .route(
            "/api/enrollments/{id}/progress",
            get(handlers::enrollment_progress),
        )
        .route(
            "/api/enrollments/{id}/complete_lesson",
            post(handlers::complete_lesson),
        )
        .route(
            "/api/enrollments/{id}/cancel",
            post(handlers::cancel_enrollment),
        )
        .route("/api/lessons/{id}/progress", get(handlers::lesson_progress))
        .route(
            "/api/lessons/{id}/complete",
            post(handlers::complete_lesson_for_caller),
        )
        .route("/api/courses/{id}/lessons", get(handlers::course_lessons))
        .route("/api/dashboard/admin", get(handlers::admin_dashboard))
        .route("/api/dashboard/instructor", get(handlers::instructor_dashboard))
        .route("/api/dashboard/student", get(handlers::student_dashboard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
