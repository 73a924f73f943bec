use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use services::LmsError;
use thiserror::Error;
use tracing::error;

/// Everything a handler can fail with, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Service(#[from] LmsError),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Service(err) => match err {
                LmsError::NotEnrolled | LmsError::Forbidden => StatusCode::FORBIDDEN,
                LmsError::LessonNotInCourse => StatusCode::BAD_REQUEST,
                LmsError::AlreadyEnrolled | LmsError::InvalidState(_) => StatusCode::CONFLICT,
                LmsError::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::StorageError;

    #[test]
    fn service_errors_map_to_status_codes() {
        let cases = [
            (LmsError::NotEnrolled, StatusCode::FORBIDDEN),
            (LmsError::Forbidden, StatusCode::FORBIDDEN),
            (LmsError::LessonNotInCourse, StatusCode::BAD_REQUEST),
            (LmsError::AlreadyEnrolled, StatusCode::CONFLICT),
            (LmsError::InvalidState("cancelled".into()), StatusCode::CONFLICT),
            (LmsError::NotFound, StatusCode::NOT_FOUND),
            (
                LmsError::Storage(StorageError::Connection("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}
