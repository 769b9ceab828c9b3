use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use thiserror::Error;
use tracing::error;

use crate::web::models::ExistingBookmark;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Duplicate URL: {message}")]
    DuplicateUrl {
        message: String,
        existing: ExistingBookmark,
    },
    #[error("Backup storage not configured")]
    BackupNotConfigured,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Upstream error: {0}")]
    UpstreamError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "success": false,
                    "error": "Invalid credentials"
                })),
            )
                .into_response(),
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            AppError::DuplicateUrl { message, existing } => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "success": false,
                    "duplicate": true,
                    "error": message,
                    "existingBookmark": existing,
                })),
            )
                .into_response(),
            AppError::BackupNotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "success": false,
                    "error": "Backup storage not configured",
                    "code": "BACKUP_NOT_CONFIGURED",
                    "message": "Backups need a storage directory. Set BACKUP_DIR and restart the server.",
                })),
            )
                .into_response(),
            // 5xx detail is logged, never echoed to the client.
            AppError::DatabaseError(msg) => {
                error!(detail = %msg, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
            AppError::UpstreamError(msg) => {
                error!(detail = %msg, "upstream request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Upstream request failed" })),
                )
                    .into_response()
            }
            AppError::InternalServerError(msg) => {
                error!(detail = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}

/// Drills into a SeaORM error to see whether the driver reported a
/// UNIQUE constraint violation, so call sites can answer 409 instead
/// of 500.
pub fn is_unique_violation(err: &DbErr) -> bool {
    if let DbErr::Query(sea_orm::RuntimeErr::SqlxError(sqlx_error)) = err {
        if let sqlx::Error::Database(database_error) = sqlx_error {
            return database_error.is_unique_violation();
        }
    }
    false
}
