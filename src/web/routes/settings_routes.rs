use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use sea_orm::{TransactionError, TransactionTrait};

use crate::db::services::settings_service;
use crate::web::models::SettingsUpdateRequest;
use crate::web::{AppState, error::AppError};

/// Public read: every non-secret key as one flat object.
async fn get_settings_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let settings = settings_service::public_settings(&app_state.db).await?;
    let map: serde_json::Map<String, serde_json::Value> = settings
        .into_iter()
        .map(|(key, value)| (key, serde_json::Value::String(value)))
        .collect();
    Ok(Json(serde_json::json!({ "success": true, "data": map })))
}

async fn update_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<SettingsUpdateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if payload.settings.is_empty() {
        return Err(AppError::InvalidInput("Invalid settings data".to_string()));
    }

    // Values are stored as strings; non-string JSON is serialized as-is.
    let entries: Vec<(String, String)> = payload
        .settings
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    app_state
        .db
        .transaction::<_, (), sea_orm::DbErr>(move |txn| {
            Box::pin(async move { settings_service::upsert_many(txn, &entries).await })
        })
        .await
        .map_err(|err| match err {
            TransactionError::Connection(db_err) => AppError::from(db_err),
            TransactionError::Transaction(db_err) => AppError::from(db_err),
        })?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// The read is public; the auth gate covers the update.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/settings",
        get(get_settings_handler).post(update_settings_handler),
    )
}
