use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
};
use std::sync::Arc;

use crate::db::services::{bookmark_service, settings_service};
use crate::web::middleware::auth::is_authenticated;
use crate::web::models::BookmarkPayload;
use crate::web::{AppState, error::AppError};

/// Public read; joined with the category name, privacy-filtered for
/// anonymous callers, and empty when `publicMode` is off.
async fn list_bookmarks_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let authenticated = is_authenticated(&app_state, &headers);

    if !authenticated && !settings_service::public_mode(&app_state.db).await? {
        return Ok(Json(serde_json::json!({ "data": [] })));
    }

    let bookmarks = bookmark_service::list_bookmarks(&app_state.db, authenticated).await?;
    Ok(Json(serde_json::json!({ "data": bookmarks })))
}

async fn create_bookmark_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<BookmarkPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let created = bookmark_service::create_bookmark(&app_state.db, &payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "id": created.id })),
    ))
}

async fn update_bookmark_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<BookmarkPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    bookmark_service::update_bookmark(&app_state.db, id, &payload).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn delete_bookmark_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    bookmark_service::delete_bookmark(&app_state.db, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// The list read is public; the auth gate covers the mutations.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/bookmarks",
            get(list_bookmarks_handler).post(create_bookmark_handler),
        )
        .route(
            "/bookmarks/{id}",
            put(update_bookmark_handler).delete(delete_bookmark_handler),
        )
}
