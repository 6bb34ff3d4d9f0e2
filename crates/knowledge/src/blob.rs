//! Storage for original uploaded files.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ragbridge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A time-limited reference to a stored original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadHandle {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl DownloadHandle {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, file_id: &str, bytes: &[u8]) -> AppResult<()>;

    async fn get(&self, file_id: &str) -> AppResult<Vec<u8>>;

    async fn get_download_handle(&self, file_id: &str) -> AppResult<DownloadHandle>;

    /// Deleting a missing blob is not an error.
    async fn delete(&self, file_id: &str) -> AppResult<()>;
}

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    ttl: Duration,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, file_id: &str) -> AppResult<PathBuf> {
        validate_file_id(file_id)?;
        Ok(self.root.join(file_id))
    }
}

/// File ids become path components; keep them to a safe alphabet.
pub fn validate_file_id(file_id: &str) -> AppResult<()> {
    let valid = !file_id.is_empty()
        && file_id.len() <= 128
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("Invalid file id: {:?}", file_id)))
    }
}

fn map_missing(err: std::io::Error, file_id: &str) -> AppError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AppError::NotFound(format!("Blob for file {}", file_id))
    } else {
        AppError::Io(err)
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, file_id: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.path_for(file_id)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Write then rename, so readers never see a partial file.
        let tmp = self.root.join(format!(".{}.tmp", file_id));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(file_id, bytes = bytes.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, file_id: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(file_id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| map_missing(e, file_id))
    }

    async fn get_download_handle(&self, file_id: &str) -> AppResult<DownloadHandle> {
        let path = self.path_for(file_id)?;
        tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_missing(e, file_id))?;

        let ttl = ChronoDuration::from_std(self.ttl)
            .map_err(|e| AppError::Config(format!("Invalid download TTL: {}", e)))?;
        let expires_at = Utc::now() + ttl;
        let absolute = std::path::absolute(&path).unwrap_or(path);

        Ok(DownloadHandle {
            url: format!("file://{}?expires={}", absolute.display(), expires_at.timestamp()),
            expires_at,
        })
    }

    async fn delete(&self, file_id: &str) -> AppResult<()> {
        let path = self.path_for(file_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> LocalBlobStore {
        LocalBlobStore::new(temp.path().join("blobs"), Duration::from_secs(86_400))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        blobs.put("doc-1", b"original bytes").await.unwrap();
        assert_eq!(blobs.get("doc-1").await.unwrap(), b"original bytes");
    }

    #[tokio::test]
    async fn test_download_handle_expires_in_a_day() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        blobs.put("doc-1", b"x").await.unwrap();

        let handle = blobs.get_download_handle("doc-1").await.unwrap();
        assert!(handle.url.starts_with("file://"));
        assert!(handle.url.contains("doc-1?expires="));

        let remaining = handle.expires_at - Utc::now();
        assert!(remaining > ChronoDuration::hours(23));
        assert!(!handle.is_expired_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);

        assert!(matches!(blobs.get("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(
            blobs.get_download_handle("nope").await,
            Err(AppError::NotFound(_))
        ));
        assert!(blobs.delete("nope").await.is_ok());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let temp = TempDir::new().unwrap();
        let blobs = store(&temp);
        let err = blobs.put("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
