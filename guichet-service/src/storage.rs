//! Object store for uploaded document images.
//!
//! Image blobs are opaque to the rest of the system: the store hands back a
//! URL-like reference string, and only the store can resolve a reference
//! back to bytes. The filesystem implementation keeps blobs under
//! `data_dir/objects/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;

/// Blob storage collaborator for uploaded images
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob under the given folder hint, returning an opaque
    /// URL-like reference. The original filename only contributes its
    /// extension.
    async fn put(
        &self,
        folder_hint: &str,
        filename: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError>;

    /// Resolve a reference previously returned by `put` back to bytes
    async fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove a stored blob by reference
    async fn delete(&self, reference: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed object store
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("objects"),
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        folder_hint: &str,
        filename: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();

        let dir = self.root.join(folder_hint);
        std::fs::create_dir_all(&dir).map_err(StorageError::Io)?;

        let path = dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        std::fs::write(&path, &bytes).map_err(StorageError::Io)?;

        debug!(path = %path.display(), size = bytes.len(), "Stored object");

        Ok(path.to_string_lossy().to_string())
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let path = Path::new(reference);
        if !path.exists() {
            return Err(StorageError::NotFound {
                reference: reference.to_string(),
            });
        }

        std::fs::read(path).map_err(StorageError::Io)
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        let path = Path::new(reference);
        if !path.exists() {
            return Err(StorageError::NotFound {
                reference: reference.to_string(),
            });
        }

        std::fs::remove_file(path).map_err(StorageError::Io)?;
        debug!(path = %path.display(), "Deleted object");

        Ok(())
    }
}
