use std::collections::HashSet;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};

use crate::db::services::{bulk_service, import_service};
use crate::web::models::{BatchOperationRequest, ImportRequest, ReorderKind, ReorderRequest};
use crate::web::{AppState, error::AppError};

async fn reorder_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let kind = match payload.kind.as_str() {
        "bookmarks" => ReorderKind::Bookmarks,
        "categories" => ReorderKind::Categories,
        _ => return Err(AppError::InvalidInput("Invalid type".to_string())),
    };
    bulk_service::reorder(&app_state.db, kind, payload.items).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Ids arrive as numbers or numeric strings; keep positive integers,
/// drop duplicates, preserve first-seen order.
fn normalize_ids(raw: &[serde_json::Value]) -> Vec<i32> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|value| match value {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        })
        .filter(|id| *id > 0 && *id <= i32::MAX as i64)
        .map(|id| id as i32)
        .filter(|id| seen.insert(*id))
        .collect()
}

async fn batch_operations_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<BatchOperationRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bookmark_ids = || -> Result<Vec<i32>, AppError> {
        let raw = payload
            .bookmark_ids
            .as_deref()
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| AppError::InvalidInput("Invalid bookmark IDs".to_string()))?;
        let ids = normalize_ids(raw);
        if ids.is_empty() {
            return Err(AppError::InvalidInput(
                "No valid bookmark IDs provided".to_string(),
            ));
        }
        Ok(ids)
    };

    match payload.operation.as_str() {
        "delete" => {
            bulk_service::delete_bookmarks(&app_state.db, &bookmark_ids()?).await?;
        }
        "delete-categories" => {
            let ids = payload
                .category_ids
                .as_deref()
                .filter(|ids| !ids.is_empty())
                .ok_or_else(|| AppError::InvalidInput("Invalid category IDs".to_string()))?;
            bulk_service::delete_categories(&app_state.db, ids).await?;
        }
        "move" => {
            let ids = bookmark_ids()?;
            let category_id = payload
                .data
                .as_ref()
                .and_then(|data| data.category_id)
                .ok_or_else(|| AppError::InvalidInput("Category ID required".to_string()))?;
            bulk_service::move_bookmarks(&app_state.db, ids, category_id).await?;
        }
        "edit" => {
            let ids = bookmark_ids()?;
            if let Some(is_private) = payload.data.as_ref().and_then(|data| data.is_private) {
                bulk_service::set_bookmarks_private(&app_state.db, &ids, is_private).await?;
            }
        }
        _ => return Err(AppError::InvalidInput("Invalid operation".to_string())),
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

async fn import_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ImportRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (Some(categories), Some(bookmarks)) = (payload.categories, payload.bookmarks) else {
        return Err(AppError::InvalidInput("Invalid data format".to_string()));
    };

    let outcome = import_service::import(&app_state.db, categories, bookmarks).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "imported": {
            "categories": outcome.imported_categories,
            "bookmarks": outcome.imported_bookmarks,
        },
        "skipped": {
            "categories": outcome.skipped_categories,
            "bookmarks": outcome.skipped_bookmarks,
        },
        "details": {
            "skippedItems": outcome.skipped_items,
        },
    })))
}

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reorder", post(reorder_handler))
        .route("/batch-operations", post(batch_operations_handler))
        .route("/import", post(import_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_normalization_accepts_numeric_strings_and_dedupes() {
        let raw = vec![
            serde_json::json!(3),
            serde_json::json!("7"),
            serde_json::json!(3),
            serde_json::json!("abc"),
            serde_json::json!(-1),
            serde_json::json!(0),
            serde_json::json!(null),
        ];
        assert_eq!(normalize_ids(&raw), vec![3, 7]);
    }
}
