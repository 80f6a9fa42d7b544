use crate::orchestration::{CoordinatorError, RunError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Coordinator(CoordinatorError),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        AppError::Coordinator(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Coordinator(err) => coordinator_response(err),
        };

        (status, Json(body)).into_response()
    }
}

fn coordinator_response(err: CoordinatorError) -> (StatusCode, serde_json::Value) {
    let message = err.to_string();
    match err {
        CoordinatorError::NotFound(_) | CoordinatorError::BatchNotFound(_) => {
            (StatusCode::NOT_FOUND, json!({ "error": message }))
        }
        CoordinatorError::EmptySelection | CoordinatorError::Validation { .. } => {
            (StatusCode::BAD_REQUEST, json!({ "error": message }))
        }
        CoordinatorError::ExpiredUndo { .. } | CoordinatorError::AlreadyUndone(_) => {
            (StatusCode::GONE, json!({ "error": message }))
        }
        CoordinatorError::PartialRestore { restored, failed } => (
            StatusCode::CONFLICT,
            json!({ "error": message, "restored": restored, "failed": failed }),
        ),
        CoordinatorError::Conflict(_) => (StatusCode::CONFLICT, json!({ "error": message })),
        CoordinatorError::Commit { .. } => (StatusCode::BAD_GATEWAY, json!({ "error": message })),
        CoordinatorError::Store(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": message }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemId, TimeMs};
    use crate::orchestration::ItemFailure;

    #[test]
    fn test_expired_undo_maps_to_gone() {
        let response = AppError::from(CoordinatorError::ExpiredUndo {
            batch_id: "b1".to_string(),
            expired_at: TimeMs::new(1),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[test]
    fn test_partial_restore_lists_items() {
        let (status, body) = coordinator_response(CoordinatorError::PartialRestore {
            restored: vec![ItemId::new("a")],
            failed: vec![ItemFailure {
                item_id: ItemId::new("b"),
                error: "storefront down".to_string(),
            }],
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["restored"][0], "a");
        assert_eq!(body["failed"][0]["itemId"], "b");
    }

    #[test]
    fn test_store_unreachable_maps_to_503() {
        let response = AppError::Unavailable("down".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
