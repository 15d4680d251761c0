//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use contentmill_core::{ErrorKind, sanitize_error};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// A pipeline error surfaced to the caller with its kind.
    Pipeline { kind: ErrorKind, message: String },
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Pipeline { kind, .. } => match kind {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
                ErrorKind::ResourceContention => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Collaborator => StatusCode::BAD_GATEWAY,
                ErrorKind::GenerationExhausted => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Pipeline { kind, message } => json!({
                "error": message,
                "kind": kind,
            }),
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Internal(msg) => json!({ "error": msg }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<contentmill_core::Error> for ApiError {
    fn from(err: contentmill_core::Error) -> Self {
        if err.kind() == ErrorKind::Internal || err.kind() == ErrorKind::Storage {
            tracing::error!(error = %err, "request failed");
        }
        ApiError::Pipeline {
            kind: err.kind(),
            message: sanitize_error(&err.to_string()),
        }
    }
}

impl From<contentmill_db::DbError> for ApiError {
    fn from(err: contentmill_db::DbError) -> Self {
        match err {
            contentmill_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            contentmill_db::DbError::Duplicate(msg) | contentmill_db::DbError::Conflict(msg) => {
                ApiError::Conflict(msg)
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentmill_core::{Error, ItemStatus};
    use std::time::Duration;

    #[test]
    fn test_status_codes_follow_error_kind() {
        let cases = [
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("item".into()), StatusCode::NOT_FOUND),
            (
                Error::InvalidTransition {
                    from: ItemStatus::Pending,
                    to: ItemStatus::Published,
                },
                StatusCode::CONFLICT,
            ),
            (
                Error::RenderContention {
                    waited: Duration::from_secs(1),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::GenerationExhausted {
                    attempts: 5,
                    last_rejection: "too long".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
