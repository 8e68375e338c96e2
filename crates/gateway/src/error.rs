//! Mapping of domain errors onto HTTP responses.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use cmp_core::error::{Error, ErrorCategory, PromptError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A request-terminating failure, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// HTTP status for a domain error.
///
/// Policy violations about the caller's input answer 403; those about the
/// rendered response answer 422.
pub fn status_for(err: &Error) -> StatusCode {
    match err.category() {
        ErrorCategory::Validation | ErrorCategory::NotFound => StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::PolicyViolation => match err {
            Error::Policy(v) if !v.is_output_side() => StatusCode::FORBIDDEN,
            Error::Prompt(PromptError::Format { .. }) | Error::Policy(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::FORBIDDEN,
        },
        ErrorCategory::Dependency => StatusCode::FAILED_DEPENDENCY,
        ErrorCategory::Render | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let mut response = (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response();

        if let Error::RateLimited { retry_after_secs } = self.0 {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs),
            );
        }
        response
    }
}
