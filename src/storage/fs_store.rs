use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use super::{BackupStore, StoreError, StoredObject};

/// Backup store rooted at a local directory. Keys map 1:1 to file
/// names; anything that could escape the root is rejected up front.
pub struct FsBackupStore {
    root: PathBuf,
}

impl FsBackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
            || key.starts_with('.')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

fn modified_rfc3339(meta: &std::fs::Metadata) -> Option<String> {
    meta.modified()
        .ok()
        .map(|time| DateTime::<Utc>::from(time).to_rfc3339())
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        self.ensure_root().await?;
        fs::write(path, data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError> {
        let mut objects = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // A store that was configured but never written to lists as
            // empty.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(objects),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            objects.push(StoredObject {
                uploaded: modified_rfc3339(&meta),
                size: meta.len(),
                key: name,
            });
        }
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
