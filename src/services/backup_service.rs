//! Building, listing, and restoring full backups through the
//! [`BackupStore`] seam.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::entities::{bookmark, category};
use crate::db::services::settings_service;
use crate::storage::{BackupStore, StoreError};
use crate::web::error::AppError;

pub const BACKUP_VERSION: &str = "1.0";
pub const BACKUP_PREFIX: &str = "backup-";

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupMetadata {
    #[serde(rename = "categoryCount")]
    pub category_count: usize,
    #[serde(rename = "bookmarkCount")]
    pub bookmark_count: usize,
    #[serde(rename = "settingCount")]
    pub setting_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupData {
    pub categories: Vec<category::Model>,
    pub bookmarks: Vec<bookmark::Model>,
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub data: BackupData,
    pub metadata: BackupMetadata,
}

#[derive(Debug, Serialize)]
pub struct CreatedBackup {
    #[serde(rename = "backupKey")]
    pub backup_key: String,
    pub timestamp: String,
    pub name: Option<String>,
    pub metadata: BackupMetadata,
}

#[derive(Debug, Serialize)]
pub struct BackupListEntry {
    pub key: String,
    pub size: u64,
    pub uploaded: Option<String>,
    pub name: Option<String>,
    pub metadata: Option<BackupMetadata>,
}

/// Keys are constrained to the `backup-*.json` shape both when written
/// and before any store lookup, so a crafted key can never leave the
/// backup namespace.
pub fn is_valid_backup_key(key: &str) -> bool {
    key.starts_with(BACKUP_PREFIX) && key.ends_with(".json")
}

/// Keeps letters, digits, underscores and hyphens; every run of
/// anything else collapses to one hyphen.
pub fn sanitize_backup_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut last_was_hyphen = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            sanitized.push(ch);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            sanitized.push('-');
            last_was_hyphen = true;
        }
    }
    sanitized.trim_matches('-').to_string()
}

pub fn backup_key(timestamp: &DateTime<Utc>, name: Option<&str>) -> String {
    let stamp = timestamp.format("%Y-%m-%dT%H-%M-%S");
    match name.map(sanitize_backup_name).filter(|s| !s.is_empty()) {
        Some(sanitized) => format!("{BACKUP_PREFIX}{stamp}-{sanitized}.json"),
        None => format!("{BACKUP_PREFIX}{stamp}.json"),
    }
}

fn store_error(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound(_) => AppError::NotFound("Backup not found".to_string()),
        StoreError::InvalidKey(key) => {
            AppError::InvalidInput(format!("Invalid backup key format: {key}"))
        }
        StoreError::Io(err) => AppError::InternalServerError(format!("backup store I/O: {err}")),
    }
}

/// Snapshots categories, bookmarks (private ones included — this is a
/// backup) and non-secret settings into one JSON object in the store.
pub async fn create_backup(
    db: &DatabaseConnection,
    store: &dyn BackupStore,
    name: Option<String>,
) -> Result<CreatedBackup, AppError> {
    let categories = category::Entity::find()
        .order_by_asc(category::Column::Depth)
        .order_by_asc(category::Column::Position)
        .all(db)
        .await?;
    let bookmarks = bookmark::Entity::find()
        .order_by_asc(bookmark::Column::CategoryId)
        .order_by_asc(bookmark::Column::Position)
        .all(db)
        .await?;
    let settings: BTreeMap<String, String> = settings_service::public_settings(db)
        .await?
        .into_iter()
        .collect();

    let now = Utc::now();
    let metadata = BackupMetadata {
        category_count: categories.len(),
        bookmark_count: bookmarks.len(),
        setting_count: settings.len(),
    };
    let document = BackupDocument {
        version: BACKUP_VERSION.to_string(),
        timestamp: now.to_rfc3339(),
        kind: "full".to_string(),
        name: name.clone(),
        data: BackupData {
            categories,
            bookmarks,
            settings,
        },
        metadata,
    };

    let key = backup_key(&now, name.as_deref());
    let body = serde_json::to_vec_pretty(&document)?;
    store.put(&key, &body).await.map_err(store_error)?;

    Ok(CreatedBackup {
        backup_key: key,
        timestamp: document.timestamp,
        name,
        metadata: document.metadata,
    })
}

/// Lists stored backups newest-first. Each document is opened to
/// recover its display name and counts; one unreadable blob degrades to
/// a bare listing entry instead of failing the call.
pub async fn list_backups(store: &dyn BackupStore) -> Result<Vec<BackupListEntry>, AppError> {
    let objects = store.list(BACKUP_PREFIX).await.map_err(store_error)?;

    let mut entries = Vec::with_capacity(objects.len());
    for object in objects {
        let parsed: Option<BackupDocument> = match store.get(&object.key).await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(err) => {
                warn!(key = %object.key, error = %err, "failed to read backup metadata");
                None
            }
        };
        let (name, metadata) = match parsed {
            Some(doc) => (doc.name, Some(doc.metadata)),
            None => (None, None),
        };
        entries.push(BackupListEntry {
            key: object.key,
            size: object.size,
            uploaded: object.uploaded,
            name,
            metadata,
        });
    }

    entries.sort_by(|a, b| b.uploaded.cmp(&a.uploaded));
    Ok(entries)
}

pub async fn download_backup(
    store: &dyn BackupStore,
    key: &str,
) -> Result<Vec<u8>, AppError> {
    if !is_valid_backup_key(key) {
        return Err(AppError::InvalidInput(
            "Invalid backup key format".to_string(),
        ));
    }
    store.get(key).await.map_err(store_error)
}

pub async fn delete_backup(store: &dyn BackupStore, key: &str) -> Result<(), AppError> {
    if !is_valid_backup_key(key) {
        return Err(AppError::InvalidInput(
            "Invalid backup key format".to_string(),
        ));
    }
    store.delete(key).await.map_err(store_error)
}

/// Loads and validates a backup document, re-applies its settings, and
/// hands the category/bookmark payload back for the client-driven
/// import pass.
pub async fn restore_backup(
    db: &DatabaseConnection,
    store: &dyn BackupStore,
    key: &str,
) -> Result<BackupDocument, AppError> {
    if !is_valid_backup_key(key) {
        return Err(AppError::InvalidInput(
            "Invalid backup key format".to_string(),
        ));
    }
    let bytes = store.get(key).await.map_err(store_error)?;
    let document: BackupDocument = serde_json::from_slice(&bytes)
        .map_err(|_| AppError::InvalidInput("Invalid backup data format".to_string()))?;

    if !document.data.settings.is_empty() {
        let entries: Vec<(String, String)> = document
            .data
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        settings_service::upsert_many(db, &entries).await?;
    }

    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::db::services::category_service::create_category;
    use crate::storage::FsBackupStore;
    use sea_orm::{ConnectOptions, Database};

    async fn test_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1);
        let db = Database::connect(opt).await.unwrap();
        schema::ensure_schema(&db).await.unwrap();
        db
    }

    #[test]
    fn sanitization_and_key_shape() {
        assert_eq!(sanitize_backup_name("my backup!"), "my-backup");
        assert_eq!(sanitize_backup_name("--a  b--"), "a-b");
        assert_eq!(sanitize_backup_name("***"), "");

        let stamp = DateTime::parse_from_rfc3339("2024-05-06T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            backup_key(&stamp, Some("weekly sync")),
            "backup-2024-05-06T07-08-09-weekly-sync.json"
        );
        assert_eq!(backup_key(&stamp, None), "backup-2024-05-06T07-08-09.json");

        assert!(is_valid_backup_key("backup-x.json"));
        assert!(!is_valid_backup_key("evil.json"));
        assert!(!is_valid_backup_key("backup-x.txt"));
    }

    #[tokio::test]
    async fn create_and_restore_roundtrip() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let store = FsBackupStore::new(dir.path());

        create_category(&db, "A", None, false).await.unwrap();
        settings_service::upsert_setting(&db, "publicMode", "false").await.unwrap();
        settings_service::upsert_setting(&db, "secret_openai_api_key", "sk-x")
            .await
            .unwrap();

        let created = create_backup(&db, &store, Some("nightly".to_string()))
            .await
            .unwrap();
        assert_eq!(created.metadata.category_count, 1);
        // Secrets stay out of backups.
        assert_eq!(created.metadata.setting_count, 1);
        assert!(created.backup_key.contains("nightly"));

        let listed = list_backups(&store).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name.as_deref(), Some("nightly"));

        // Wipe the setting, restore, and confirm it came back.
        settings_service::upsert_setting(&db, "publicMode", "true").await.unwrap();
        let document = restore_backup(&db, &store, &created.backup_key).await.unwrap();
        assert_eq!(document.data.categories.len(), 1);
        assert_eq!(
            settings_service::get_setting(&db, "publicMode").await.unwrap().as_deref(),
            Some("false")
        );
    }

    #[tokio::test]
    async fn restore_rejects_malformed_keys_and_blobs() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let store = FsBackupStore::new(dir.path());

        assert!(matches!(
            restore_backup(&db, &store, "not-a-backup.json").await,
            Err(AppError::InvalidInput(_))
        ));

        store.put("backup-bad.json", b"not json").await.unwrap();
        assert!(matches!(
            restore_backup(&db, &store, "backup-bad.json").await,
            Err(AppError::InvalidInput(_))
        ));

        assert!(matches!(
            restore_backup(&db, &store, "backup-missing.json").await,
            Err(AppError::NotFound(_))
        ));
    }
}
