//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error returned by handlers and extractors.
///
/// Renders as `{"error": message}` with the matching status code.
#[derive(Debug)]
pub enum ApiError {
    Internal(taskpulse_core::Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
}

impl From<taskpulse_core::Error> for ApiError {
    fn from(err: taskpulse_core::Error) -> Self {
        use taskpulse_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::TaskNotFound(id) => ApiError::NotFound(format!("Task {} not found", id)),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                tracing::error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpulse_core::Error;
    use uuid::Uuid;

    #[test]
    fn test_core_errors_map_to_status_codes() {
        let cases = [
            (Error::TaskNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (Error::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (Error::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
            (Error::Store("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
