use std::collections::HashMap;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::db::entities::setting;

/// Settings with this prefix hold secrets (API keys); they never leave
/// the server through the read APIs and are excluded from backups.
pub const SECRET_PREFIX: &str = "secret_";

pub async fn get_setting<C: ConnectionTrait>(
    db: &C,
    key: &str,
) -> Result<Option<String>, DbErr> {
    Ok(setting::Entity::find_by_id(key.to_owned())
        .one(db)
        .await?
        .map(|row| row.value))
}

/// Fetches several settings in one query, returned as a key→value map.
pub async fn get_settings_map<C: ConnectionTrait>(
    db: &C,
    keys: &[&str],
) -> Result<HashMap<String, String>, DbErr> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = setting::Entity::find()
        .filter(setting::Column::Key.is_in(keys.iter().map(|k| k.to_string())))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
}

/// Every non-secret setting, ordered by key.
pub async fn public_settings<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<(String, String)>, DbErr> {
    let rows = setting::Entity::find()
        .order_by_asc(setting::Column::Key)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .filter(|row| !row.key.starts_with(SECRET_PREFIX))
        .map(|row| (row.key, row.value))
        .collect())
}

/// Creates or updates a setting.
pub async fn upsert_setting<C: ConnectionTrait>(
    db: &C,
    key: &str,
    value: &str,
) -> Result<(), DbErr> {
    let active = setting::ActiveModel {
        key: Set(key.to_owned()),
        value: Set(value.to_owned()),
        updated_at: Set(Utc::now()),
    };
    setting::Entity::insert(active)
        .on_conflict(
            OnConflict::column(setting::Column::Key)
                .update_columns([setting::Column::Value, setting::Column::UpdatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

pub async fn upsert_many<C: ConnectionTrait>(
    db: &C,
    entries: &[(String, String)],
) -> Result<(), DbErr> {
    for (key, value) in entries {
        upsert_setting(db, key, value).await?;
    }
    Ok(())
}

pub async fn delete_setting<C: ConnectionTrait>(db: &C, key: &str) -> Result<(), DbErr> {
    setting::Entity::delete_many()
        .filter(setting::Column::Key.eq(key))
        .exec(db)
        .await?;
    Ok(())
}

/// `publicMode` defaults to on; only the literal string "false" turns
/// anonymous read access off.
pub async fn public_mode<C: ConnectionTrait>(db: &C) -> Result<bool, DbErr> {
    Ok(get_setting(db, "publicMode").await?.as_deref() != Some("false"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use sea_orm::{ConnectOptions, Database, DatabaseConnection};

    async fn test_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1);
        let db = Database::connect(opt).await.unwrap();
        schema::ensure_schema(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn upsert_overwrites_and_reads_back() {
        let db = test_db().await;
        upsert_setting(&db, "theme", "dark").await.unwrap();
        upsert_setting(&db, "theme", "light").await.unwrap();
        assert_eq!(get_setting(&db, "theme").await.unwrap().as_deref(), Some("light"));
    }

    #[tokio::test]
    async fn secrets_are_hidden_from_public_listing() {
        let db = test_db().await;
        upsert_setting(&db, "secret_openai_api_key", "sk-abc").await.unwrap();
        upsert_setting(&db, "publicMode", "true").await.unwrap();

        let listed = public_settings(&db).await.unwrap();
        assert_eq!(listed, vec![("publicMode".to_string(), "true".to_string())]);
    }

    #[tokio::test]
    async fn public_mode_defaults_on_and_only_false_disables() {
        let db = test_db().await;
        assert!(public_mode(&db).await.unwrap());
        upsert_setting(&db, "publicMode", "false").await.unwrap();
        assert!(!public_mode(&db).await.unwrap());
        upsert_setting(&db, "publicMode", "anything-else").await.unwrap();
        assert!(public_mode(&db).await.unwrap());
    }
}
