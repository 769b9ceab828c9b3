use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::db::services::{category_service, settings_service};
use crate::web::middleware::auth::is_authenticated;
use crate::web::models::{CreateCategoryRequest, UpdateCategoryRequest};
use crate::web::{AppState, error::AppError};

/// Public read: anonymous callers see non-private rows only, and
/// nothing at all when `publicMode` is off.
async fn list_categories_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let authenticated = is_authenticated(&app_state, &headers);

    if !authenticated && !settings_service::public_mode(&app_state.db).await? {
        return Ok(Json(serde_json::json!({ "data": [] })));
    }

    let categories = category_service::list_categories(&app_state.db, authenticated).await?;
    Ok(Json(serde_json::json!({ "data": categories })))
}

async fn create_category_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let created = category_service::create_category(
        &app_state.db,
        &payload.name,
        payload.parent_id,
        payload.is_private,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "id": created.id })),
    ))
}

async fn update_category_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    category_service::update_category(&app_state.db, id, payload).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn delete_category_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    category_service::delete_category(&app_state.db, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn empty_categories_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let empty = category_service::find_empty_categories(&app_state.db).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "count": empty.len(),
        "emptyCategories": empty,
    })))
}

async fn cleanup_empty_categories_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = category_service::cleanup_empty_categories(&app_state.db).await?;
    if removed.is_empty() {
        return Ok(Json(serde_json::json!({
            "success": true,
            "deletedCount": 0,
            "message": "No empty categories to clean up",
        })));
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "deletedCount": removed.len(),
        "deletedCategories": removed,
    })))
}

/// The list read is public; the auth gate covers the mutations.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/categories",
            get(list_categories_handler).post(create_category_handler),
        )
        .route(
            "/categories/{id}",
            put(update_category_handler).delete(delete_category_handler),
        )
        .route("/categories/empty", get(empty_categories_handler))
        .route("/categories/cleanup", post(cleanup_empty_categories_handler))
}
