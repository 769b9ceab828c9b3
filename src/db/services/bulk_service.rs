use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionError, TransactionTrait,
};

use crate::db::entities::{bookmark, category};
use crate::db::services::bookmark_service;
use crate::db::services::category_service::{self, WRITE_CHUNK_SIZE};
use crate::web::error::AppError;
use crate::web::models::{ReorderItem, ReorderKind};

fn transaction_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Connection(db_err) => db_err.into(),
        TransactionError::Transaction(app_err) => app_err,
    }
}

/// Applies a batch of `{id, position}` updates in one transaction.
pub async fn reorder(
    db: &DatabaseConnection,
    kind: ReorderKind,
    items: Vec<ReorderItem>,
) -> Result<(), AppError> {
    db.transaction::<_, (), AppError>(move |txn| {
        Box::pin(async move {
            for item in items {
                match kind {
                    ReorderKind::Bookmarks => {
                        bookmark::Entity::update_many()
                            .col_expr(bookmark::Column::Position, Expr::value(item.position))
                            .filter(bookmark::Column::Id.eq(item.id))
                            .exec(txn)
                            .await?;
                    }
                    ReorderKind::Categories => {
                        category::Entity::update_many()
                            .col_expr(category::Column::Position, Expr::value(item.position))
                            .filter(category::Column::Id.eq(item.id))
                            .exec(txn)
                            .await?;
                    }
                }
            }
            Ok(())
        })
    })
    .await
    .map_err(transaction_error)
}

/// Deletes bookmarks in chunks of 100 to stay under statement parameter
/// limits. Chunks are independent; a failure aborts with the ordinary
/// error path and earlier chunks stay deleted, as the API contract for
/// bulk operations allows.
pub async fn delete_bookmarks(db: &DatabaseConnection, ids: &[i32]) -> Result<(), AppError> {
    for chunk in ids.chunks(WRITE_CHUNK_SIZE) {
        bookmark::Entity::delete_many()
            .filter(bookmark::Column::Id.is_in(chunk.to_vec()))
            .exec(db)
            .await?;
    }
    Ok(())
}

/// Deletes categories with full subtree + bookmark cascade per id. An id
/// already removed as a descendant of an earlier one is a no-op.
pub async fn delete_categories(db: &DatabaseConnection, ids: &[i32]) -> Result<(), AppError> {
    for id in ids {
        category_service::delete_category(db, *id).await?;
    }
    Ok(())
}

/// Moves bookmarks to `category_id`, appending them after the target's
/// current maximum position in the order given.
pub async fn move_bookmarks(
    db: &DatabaseConnection,
    ids: Vec<i32>,
    category_id: i32,
) -> Result<(), AppError> {
    let start = bookmark_service::next_position_in_category(db, category_id).await?;
    db.transaction::<_, (), AppError>(move |txn| {
        Box::pin(async move {
            let mut position = start;
            for id in ids {
                bookmark::Entity::update_many()
                    .col_expr(bookmark::Column::CategoryId, Expr::value(category_id))
                    .col_expr(bookmark::Column::Position, Expr::value(position))
                    .col_expr(bookmark::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(bookmark::Column::Id.eq(id))
                    .exec(txn)
                    .await?;
                position += 1;
            }
            Ok(())
        })
    })
    .await
    .map_err(transaction_error)
}

pub async fn set_bookmarks_private(
    db: &DatabaseConnection,
    ids: &[i32],
    is_private: bool,
) -> Result<(), AppError> {
    for chunk in ids.chunks(WRITE_CHUNK_SIZE) {
        bookmark::Entity::update_many()
            .col_expr(bookmark::Column::IsPrivate, Expr::value(is_private))
            .col_expr(bookmark::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(bookmark::Column::Id.is_in(chunk.to_vec()))
            .exec(db)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::db::services::bookmark_service::create_bookmark;
    use crate::db::services::category_service::create_category;
    use crate::web::models::BookmarkPayload;
    use sea_orm::{ConnectOptions, Database};

    async fn test_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1);
        let db = Database::connect(opt).await.unwrap();
        schema::ensure_schema(&db).await.unwrap();
        db
    }

    fn payload(name: &str, url: &str, category_id: i32) -> BookmarkPayload {
        BookmarkPayload {
            name: name.to_string(),
            url: url.to_string(),
            description: None,
            icon: None,
            category_id,
            is_private: false,
            tags: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn reorder_updates_positions() {
        let db = test_db().await;
        let a = create_category(&db, "A", None, false).await.unwrap();
        let b = create_category(&db, "B", None, false).await.unwrap();

        reorder(
            &db,
            ReorderKind::Categories,
            vec![
                ReorderItem { id: a.id, position: 1 },
                ReorderItem { id: b.id, position: 0 },
            ],
        )
        .await
        .unwrap();

        let a = category::Entity::find_by_id(a.id).one(&db).await.unwrap().unwrap();
        let b = category::Entity::find_by_id(b.id).one(&db).await.unwrap().unwrap();
        assert_eq!((a.position, b.position), (1, 0));
    }

    #[tokio::test]
    async fn move_appends_after_existing_positions() {
        let db = test_db().await;
        let from = create_category(&db, "From", None, false).await.unwrap();
        let to = create_category(&db, "To", None, false).await.unwrap();

        create_bookmark(&db, &payload("Stay", "https://stay.example", to.id))
            .await
            .unwrap();
        let one = create_bookmark(&db, &payload("One", "https://one.example", from.id))
            .await
            .unwrap();
        let two = create_bookmark(&db, &payload("Two", "https://two.example", from.id))
            .await
            .unwrap();

        move_bookmarks(&db, vec![one.id, two.id], to.id).await.unwrap();

        let one = bookmark::Entity::find_by_id(one.id).one(&db).await.unwrap().unwrap();
        let two = bookmark::Entity::find_by_id(two.id).one(&db).await.unwrap().unwrap();
        assert_eq!((one.category_id, one.position), (to.id, 1));
        assert_eq!((two.category_id, two.position), (to.id, 2));
    }

    #[tokio::test]
    async fn bulk_delete_and_privacy_edit() {
        let db = test_db().await;
        let cat = create_category(&db, "C", None, false).await.unwrap();
        let one = create_bookmark(&db, &payload("One", "https://one.example", cat.id))
            .await
            .unwrap();
        let two = create_bookmark(&db, &payload("Two", "https://two.example", cat.id))
            .await
            .unwrap();

        set_bookmarks_private(&db, &[one.id, two.id], true).await.unwrap();
        let one_row = bookmark::Entity::find_by_id(one.id).one(&db).await.unwrap().unwrap();
        assert!(one_row.is_private);

        delete_bookmarks(&db, &[one.id]).await.unwrap();
        assert!(bookmark::Entity::find_by_id(one.id).one(&db).await.unwrap().is_none());
        assert!(bookmark::Entity::find_by_id(two.id).one(&db).await.unwrap().is_some());
    }
}
