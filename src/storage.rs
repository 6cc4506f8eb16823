use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Blob storage for uploaded file contents
///
/// Blobs are written to a local directory under random keys; the database
/// only stores the key.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the store, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!("Blob storage at: {:?}", root);
        Ok(Self { root })
    }

    /// Store bytes under a new key and return the key
    pub async fn put(&self, bytes: &[u8]) -> Result<String> {
        let key = uuid::Uuid::new_v4().simple().to_string();
        tokio::fs::write(self.path_for(&key)?, bytes).await?;
        Ok(key)
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path_for(key)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::error!("Blob {} referenced by metadata is missing", key);
                Err(AppError::NotFound("File content"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a blob; a missing blob is not an error
    pub async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of many blobs after their metadata is gone
    pub async fn delete_all(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.delete(key).await {
                tracing::warn!("Failed to delete blob {}: {}", key, e);
            }
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if !Self::validate_key(key) {
            return Err(AppError::Internal(format!("invalid storage key {key:?}")));
        }
        Ok(self.root.join(key))
    }

    /// Keys are generated hex strings; anything else could escape the root
    pub fn validate_key(key: &str) -> bool {
        !key.is_empty() && key.len() <= 64 && key.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path().join("blobs")).await.unwrap();

        let key = store.put(b"hello world").await.unwrap();
        assert!(BlobStore::validate_key(&key));
        assert_eq!(store.get(&key).await.unwrap(), b"hello world");

        store.delete(&key).await.unwrap();
        assert!(matches!(store.get(&key).await, Err(AppError::NotFound(_))));

        // Deleting twice is fine
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_keys() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();

        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.delete("a/b").await.is_err());
        assert!(!BlobStore::validate_key(""));
        assert!(!BlobStore::validate_key(".."));
    }
}
