use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use lms_core::access::Principal;
use lms_core::model::UserId;
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying the user id authenticated by the upstream gateway.
pub const USER_HEADER: &str = "x-user-id";

/// The authenticated caller, resolved through the user store.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Principal);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id: UserId = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .ok_or(ApiError::Unauthorized)?;

        match state.services.principal(user_id).await? {
            Some(principal) => Ok(Self(principal)),
            None => {
                debug!(user = %user_id, "unknown user");
                Err(ApiError::Unauthorized)
            }
        }
    }
}
