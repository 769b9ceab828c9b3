use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    FromQueryResult, JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use serde::Serialize;

use crate::db::entities::{bookmark, category};
use crate::web::error::{AppError, is_unique_violation};
use crate::web::models::{BookmarkPayload, ExistingBookmark};

/// A bookmark row joined with its category's name, the shape the list
/// API returns.
#[derive(Debug, Clone, Serialize, FromQueryResult)]
pub struct BookmarkWithCategory {
    pub id: i32,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub category_id: i32,
    pub position: i32,
    pub is_private: bool,
    pub tags: String,
    pub notes: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub category_name: Option<String>,
}

pub async fn list_bookmarks(
    db: &DatabaseConnection,
    include_private: bool,
) -> Result<Vec<BookmarkWithCategory>, DbErr> {
    let mut query = bookmark::Entity::find()
        .column_as(category::Column::Name, "category_name")
        .join(JoinType::LeftJoin, bookmark::Relation::Category.def());
    if !include_private {
        query = query.filter(bookmark::Column::IsPrivate.eq(false));
    }
    query
        .order_by_asc(bookmark::Column::CategoryId)
        .order_by_asc(bookmark::Column::Position)
        .into_model()
        .all(db)
        .await
}

/// Looks up the owner of `url`, excluding `exclude_id` on updates, so the
/// conflict response can point at the existing bookmark.
pub async fn find_by_url<C: ConnectionTrait>(
    db: &C,
    url: &str,
    exclude_id: Option<i32>,
) -> Result<Option<ExistingBookmark>, DbErr> {
    let mut query = bookmark::Entity::find().filter(bookmark::Column::Url.eq(url.trim()));
    if let Some(id) = exclude_id {
        query = query.filter(bookmark::Column::Id.ne(id));
    }
    let Some((existing, category)) = query
        .find_also_related(category::Entity)
        .one(db)
        .await?
    else {
        return Ok(None);
    };
    Ok(Some(ExistingBookmark {
        id: existing.id,
        name: existing.name,
        url: existing.url,
        category_id: existing.category_id,
        category_name: category.map(|c| c.name),
    }))
}

pub async fn next_position_in_category<C: ConnectionTrait>(
    db: &C,
    category_id: i32,
) -> Result<i32, DbErr> {
    Ok(bookmark::Entity::find()
        .filter(bookmark::Column::CategoryId.eq(category_id))
        .order_by_desc(bookmark::Column::Position)
        .one(db)
        .await?
        .map(|b| b.position + 1)
        .unwrap_or(0))
}

fn duplicate_url_error(message: &str, existing: ExistingBookmark) -> AppError {
    AppError::DuplicateUrl {
        message: message.to_string(),
        existing,
    }
}

pub async fn create_bookmark(
    db: &DatabaseConnection,
    payload: &BookmarkPayload,
) -> Result<bookmark::Model, AppError> {
    if let Some(existing) = find_by_url(db, &payload.url, None).await? {
        return Err(duplicate_url_error("This URL is already bookmarked", existing));
    }

    let position = next_position_in_category(db, payload.category_id).await?;
    let now = Utc::now();
    let new_bookmark = bookmark::ActiveModel {
        name: Set(payload.name.clone()),
        url: Set(payload.url.clone()),
        description: Set(payload.description.clone()),
        icon: Set(payload.icon.clone()),
        category_id: Set(payload.category_id),
        position: Set(position),
        is_private: Set(payload.is_private),
        tags: Set(payload.tags.clone().unwrap_or_default()),
        notes: Set(payload.notes.clone().unwrap_or_default()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    match new_bookmark.insert(db).await {
        Ok(model) => Ok(model),
        Err(err) if is_unique_violation(&err) => {
            // Lost a race with another writer; report whoever got there.
            match find_by_url(db, &payload.url, None).await? {
                Some(existing) => {
                    Err(duplicate_url_error("This URL is already bookmarked", existing))
                }
                None => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn update_bookmark(
    db: &DatabaseConnection,
    id: i32,
    payload: &BookmarkPayload,
) -> Result<(), AppError> {
    if let Some(existing) = find_by_url(db, &payload.url, Some(id)).await? {
        return Err(duplicate_url_error(
            "This URL is used by another bookmark",
            existing,
        ));
    }

    let updated = bookmark::Entity::update_many()
        .col_expr(bookmark::Column::Name, Expr::value(payload.name.clone()))
        .col_expr(bookmark::Column::Url, Expr::value(payload.url.clone()))
        .col_expr(
            bookmark::Column::Description,
            Expr::value(payload.description.clone()),
        )
        .col_expr(bookmark::Column::Icon, Expr::value(payload.icon.clone()))
        .col_expr(
            bookmark::Column::CategoryId,
            Expr::value(payload.category_id),
        )
        .col_expr(
            bookmark::Column::IsPrivate,
            Expr::value(payload.is_private),
        )
        .col_expr(
            bookmark::Column::Tags,
            Expr::value(payload.tags.clone().unwrap_or_default()),
        )
        .col_expr(
            bookmark::Column::Notes,
            Expr::value(payload.notes.clone().unwrap_or_default()),
        )
        .col_expr(bookmark::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(bookmark::Column::Id.eq(id))
        .exec(db)
        .await?;

    if updated.rows_affected == 0 {
        return Err(AppError::NotFound("Bookmark not found".to_string()));
    }
    Ok(())
}

pub async fn delete_bookmark(db: &DatabaseConnection, id: i32) -> Result<(), AppError> {
    bookmark::Entity::delete_many()
        .filter(bookmark::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}
