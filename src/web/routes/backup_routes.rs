use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;

use crate::services::backup_service;
use crate::storage::BackupStore;
use crate::web::{AppState, error::AppError};

#[derive(Debug, Default, Deserialize)]
pub struct CreateBackupRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestoreBackupRequest {
    #[serde(rename = "backupKey")]
    pub backup_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BackupKeyQuery {
    pub key: Option<String>,
}

fn store(app_state: &AppState) -> Result<&Arc<dyn BackupStore>, AppError> {
    app_state
        .backup_store
        .as_ref()
        .ok_or(AppError::BackupNotConfigured)
}

fn required_key(key: Option<String>) -> Result<String, AppError> {
    key.filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Backup key is required".to_string()))
}

async fn create_backup_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Option<Json<CreateBackupRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = store(&app_state)?;

    let name = payload
        .map(|Json(body)| body)
        .unwrap_or_default()
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());
    if let Some(name) = &name {
        if name.chars().count() > 50 {
            return Err(AppError::InvalidInput(
                "Backup name must be between 1 and 50 characters".to_string(),
            ));
        }
    }

    let created = backup_service::create_backup(&app_state.db, store.as_ref(), name).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "backupKey": created.backup_key,
        "timestamp": created.timestamp,
        "name": created.name,
        "metadata": created.metadata,
    })))
}

async fn list_backups_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = store(&app_state)?;
    let backups = backup_service::list_backups(store.as_ref()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "count": backups.len(),
        "backups": backups,
    })))
}

async fn download_backup_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<BackupKeyQuery>,
) -> Result<Response, AppError> {
    let store = store(&app_state)?;
    let key = required_key(query.key)?;
    let body = backup_service::download_backup(store.as_ref(), &key).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{key}\""),
            ),
        ],
        body,
    )
        .into_response())
}

async fn restore_backup_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<RestoreBackupRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = store(&app_state)?;
    let key = required_key(payload.backup_key)?;

    // Settings are applied here; categories/bookmarks go back to the
    // caller, which replays them through the import endpoint.
    let document = backup_service::restore_backup(&app_state.db, store.as_ref(), &key).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "backupData": {
            "categories": document.data.categories,
            "bookmarks": document.data.bookmarks,
            "settings": document.data.settings,
            "metadata": document.metadata,
        },
    })))
}

async fn delete_backup_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<BackupKeyQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = store(&app_state)?;
    let key = required_key(query.key)?;
    backup_service::delete_backup(store.as_ref(), &key).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Backup deleted successfully",
    })))
}

pub fn create_backup_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(create_backup_handler))
        .route("/list", get(list_backups_handler))
        .route("/download", get(download_backup_handler))
        .route("/restore", post(restore_backup_handler))
        .route("/delete", delete(delete_backup_handler))
}
