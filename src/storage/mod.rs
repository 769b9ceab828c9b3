//! Object-storage seam for backups. The server only ever talks to the
//! [`BackupStore`] trait; the bundled implementation keeps blobs in a
//! local directory.

pub mod fs_store;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use fs_store::FsBackupStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    /// RFC 3339 upload/modification time, when the backend knows it.
    pub uploaded: Option<String>,
}

#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
