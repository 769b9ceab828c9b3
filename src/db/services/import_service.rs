use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::category_tree::MAX_DEPTH;
use crate::db::entities::{bookmark, category};
use crate::db::services::bookmark_service;
use crate::db::services::category_service::WRITE_CHUNK_SIZE;
use crate::web::error::AppError;
use crate::web::models::{ImportBookmark, ImportCategory};

#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportOutcome {
    pub imported_categories: usize,
    pub imported_bookmarks: usize,
    pub skipped_categories: usize,
    pub skipped_bookmarks: usize,
    pub skipped_items: Vec<SkippedItem>,
}

impl ImportOutcome {
    fn skip_category(&mut self, name: &str, reason: String) {
        self.skipped_categories += 1;
        self.skipped_items.push(SkippedItem {
            kind: "category",
            name: name.to_string(),
            reason,
        });
    }

    fn skip_bookmark(&mut self, name: &str, reason: String) {
        self.skipped_bookmarks += 1;
        self.skipped_items.push(SkippedItem {
            kind: "bookmark",
            name: name.to_string(),
            reason,
        });
    }
}

fn lookup_key(name: &str, parent_id: Option<i32>) -> String {
    match parent_id {
        Some(pid) => format!("{name}|{pid}"),
        None => name.to_string(),
    }
}

/// Imports a category/bookmark batch. Nothing here is atomic as a unit:
/// each item succeeds or is skipped with a reason, and the caller
/// reconciles from the per-item lists.
pub async fn import(
    db: &DatabaseConnection,
    categories: Vec<ImportCategory>,
    bookmarks: Vec<ImportBookmark>,
) -> Result<ImportOutcome, AppError> {
    info!(
        categories = categories.len(),
        bookmarks = bookmarks.len(),
        "starting import"
    );
    let mut outcome = ImportOutcome::default();

    // One query for the current forest instead of a lookup per item.
    let existing = category::Entity::find().all(db).await?;
    let mut existing_by_key: HashMap<String, i32> = HashMap::new();
    let mut depth_by_id: HashMap<i32, i32> = HashMap::new();
    for cat in &existing {
        existing_by_key.insert(lookup_key(&cat.name, cat.parent_id), cat.id);
        depth_by_id.insert(cat.id, cat.depth);
    }

    // Old id → new id; parents must resolve before their children, so
    // process in depth order.
    let mut id_mapping: HashMap<i32, i32> = HashMap::new();
    let mut sorted = categories;
    sorted.sort_by_key(|cat| cat.depth.unwrap_or(0));

    for cat in &sorted {
        let new_parent_id = match cat.parent_id {
            Some(old_parent) => match id_mapping.get(&old_parent) {
                Some(mapped) => Some(*mapped),
                None => {
                    outcome.skip_category(&cat.name, "parent not found".to_string());
                    continue;
                }
            },
            None => None,
        };

        let depth = new_parent_id
            .and_then(|pid| depth_by_id.get(&pid))
            .map(|parent_depth| parent_depth + 1)
            .unwrap_or(0);
        if depth > MAX_DEPTH {
            outcome.skip_category(
                &cat.name,
                format!("exceeds maximum nesting depth ({MAX_DEPTH})"),
            );
            continue;
        }

        let key = lookup_key(&cat.name, new_parent_id);
        if let Some(existing_id) = existing_by_key.get(&key) {
            // Merge: children of this import node attach to the existing
            // category.
            id_mapping.insert(cat.id, *existing_id);
            depth_by_id.entry(*existing_id).or_insert(depth);
            outcome.skip_category(&cat.name, "category already exists".to_string());
            continue;
        }

        let now = Utc::now();
        let inserted = category::ActiveModel {
            name: Set(cat.name.clone()),
            parent_id: Set(new_parent_id),
            depth: Set(depth),
            position: Set(cat.position.unwrap_or(0)),
            is_private: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await;

        match inserted {
            Ok(model) => {
                id_mapping.insert(cat.id, model.id);
                existing_by_key.insert(key, model.id);
                depth_by_id.insert(model.id, depth);
                outcome.imported_categories += 1;
            }
            Err(err) => {
                warn!(name = %cat.name, error = %err, "failed to import category");
                outcome.skip_category(&cat.name, format!("import failed: {err}"));
            }
        }
    }

    info!(
        imported = outcome.imported_categories,
        skipped = outcome.skipped_categories,
        "categories processed"
    );

    // Existing URLs in one query; duplicates are skipped, not updated.
    let mut seen_urls: HashSet<String> = bookmark::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|b| b.url)
        .collect();

    // Next free position per target category.
    let mut next_positions: HashMap<i32, i32> = HashMap::new();
    let targets: HashSet<i32> = id_mapping.values().copied().collect();
    for category_id in targets {
        let next = bookmark_service::next_position_in_category(db, category_id).await?;
        next_positions.insert(category_id, next);
    }

    let mut to_insert: Vec<bookmark::ActiveModel> = Vec::new();
    let mut insert_names: Vec<String> = Vec::new();
    for bm in &bookmarks {
        let Some(category_id) = id_mapping.get(&bm.category_id).copied() else {
            outcome.skip_bookmark(&bm.name, "category not found".to_string());
            continue;
        };
        if seen_urls.contains(&bm.url) {
            outcome.skip_bookmark(&bm.name, "bookmark already exists".to_string());
            continue;
        }
        seen_urls.insert(bm.url.clone());

        let position = next_positions.entry(category_id).or_insert(0);
        let now = Utc::now();
        to_insert.push(bookmark::ActiveModel {
            name: Set(bm.name.clone()),
            url: Set(bm.url.clone()),
            description: Set(bm.description.clone()),
            icon: Set(bm.icon.clone()),
            category_id: Set(category_id),
            position: Set(*position),
            is_private: Set(bm.is_private),
            tags: Set(String::new()),
            notes: Set(String::new()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        });
        insert_names.push(bm.name.clone());
        *position += 1;
    }

    for (chunk, names) in to_insert
        .chunks(WRITE_CHUNK_SIZE)
        .zip(insert_names.chunks(WRITE_CHUNK_SIZE))
    {
        match bookmark::Entity::insert_many(chunk.to_vec()).exec(db).await {
            Ok(_) => outcome.imported_bookmarks += chunk.len(),
            Err(err) => {
                // A poisoned row fails its whole chunk; retry one by one
                // so the rest of the chunk still lands.
                warn!(error = %err, "chunked insert failed, retrying individually");
                for (row, name) in chunk.iter().zip(names) {
                    match row.clone().insert(db).await {
                        Ok(_) => outcome.imported_bookmarks += 1,
                        Err(err) => {
                            outcome.skip_bookmark(name, format!("import failed: {err}"));
                        }
                    }
                }
            }
        }
    }

    info!(
        imported = outcome.imported_bookmarks,
        skipped = outcome.skipped_bookmarks,
        "import completed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::db::services::category_service::create_category;
    use sea_orm::{ConnectOptions, Database};

    async fn test_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1);
        let db = Database::connect(opt).await.unwrap();
        schema::ensure_schema(&db).await.unwrap();
        db
    }

    fn cat(id: i32, name: &str, parent_id: Option<i32>, depth: i32) -> ImportCategory {
        ImportCategory {
            id,
            name: name.to_string(),
            parent_id,
            depth: Some(depth),
            position: Some(0),
        }
    }

    fn bm(name: &str, url: &str, category_id: i32) -> ImportBookmark {
        ImportBookmark {
            name: name.to_string(),
            url: url.to_string(),
            description: None,
            icon: None,
            category_id,
            is_private: false,
        }
    }

    #[tokio::test]
    async fn missing_parent_is_skipped_while_valid_items_import() {
        let db = test_db().await;
        let categories = vec![
            cat(1, "A", None, 0),
            // References old id 99 which is neither in the batch nor
            // pre-existing.
            cat(2, "B", Some(99), 1),
        ];
        let outcome = import(&db, categories, vec![bm("One", "https://one.example", 1)])
            .await
            .unwrap();

        assert_eq!(outcome.imported_categories, 1);
        assert_eq!(outcome.skipped_categories, 1);
        assert_eq!(outcome.skipped_items[0].reason, "parent not found");
        assert_eq!(outcome.imported_bookmarks, 1);
    }

    #[tokio::test]
    async fn existing_category_is_reused_for_children() {
        let db = test_db().await;
        let existing = create_category(&db, "A", None, false).await.unwrap();

        let categories = vec![cat(10, "A", None, 0), cat(11, "Sub", Some(10), 1)];
        let outcome = import(&db, categories, vec![]).await.unwrap();

        assert_eq!(outcome.imported_categories, 1);
        assert_eq!(outcome.skipped_categories, 1);
        assert_eq!(outcome.skipped_items[0].reason, "category already exists");

        let sub = category::Entity::find()
            .filter(category::Column::Name.eq("Sub"))
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.parent_id, Some(existing.id));
        assert_eq!(sub.depth, 1);
    }

    #[tokio::test]
    async fn duplicate_urls_and_unmapped_categories_are_skipped() {
        let db = test_db().await;
        let target = create_category(&db, "Target", None, false).await.unwrap();
        bookmark::ActiveModel {
            name: Set("Existing".to_string()),
            url: Set("https://dup.example".to_string()),
            description: Set(None),
            icon: Set(None),
            category_id: Set(target.id),
            position: Set(0),
            is_private: Set(false),
            tags: Set(String::new()),
            notes: Set(String::new()),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let categories = vec![cat(1, "Target", None, 0)];
        let bookmarks = vec![
            bm("Dup", "https://dup.example", 1),
            bm("Orphan", "https://orphan.example", 42),
            bm("Fresh", "https://fresh.example", 1),
        ];
        let outcome = import(&db, categories, bookmarks).await.unwrap();

        assert_eq!(outcome.imported_bookmarks, 1);
        assert_eq!(outcome.skipped_bookmarks, 2);
        let reasons: Vec<&str> = outcome
            .skipped_items
            .iter()
            .filter(|item| item.kind == "bookmark")
            .map(|item| item.reason.as_str())
            .collect();
        assert!(reasons.contains(&"bookmark already exists"));
        assert!(reasons.contains(&"category not found"));

        // Fresh lands after the pre-existing bookmark.
        let fresh = bookmark::Entity::find()
            .filter(bookmark::Column::Url.eq("https://fresh.example"))
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.position, 1);
    }

    #[tokio::test]
    async fn overdeep_import_category_is_skipped() {
        let db = test_db().await;

        // A chain of 7 fresh categories: n0..n5 land at depths 0..5, n6
        // computes depth 6 and is skipped.
        let chain: Vec<ImportCategory> = (0..7)
            .map(|i| ImportCategory {
                id: 100 + i,
                name: format!("n{i}"),
                parent_id: if i == 0 { None } else { Some(100 + i - 1) },
                depth: Some(i),
                position: Some(0),
            })
            .collect();
        let outcome = import(&db, chain, vec![]).await.unwrap();
        assert_eq!(outcome.imported_categories, 6);
        assert_eq!(outcome.skipped_categories, 1);
        assert!(
            outcome.skipped_items[0]
                .reason
                .starts_with("exceeds maximum nesting depth")
        );
    }
}
