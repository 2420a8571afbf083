//! Blob storage abstraction
//!
//! Documents are stored as text blobs addressed by storage key. The
//! processor only ever reads; uploads happen upstream.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Fetch the full text body stored under `key`.
    async fn fetch_text(&self, key: &str) -> Result<String>;
}

/// Filesystem-backed blob source. Keys are paths relative to `root`.
pub struct LocalBlobSource {
    root: PathBuf,
}

impl LocalBlobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobSource for LocalBlobSource {
    async fn fetch_text(&self, key: &str) -> Result<String> {
        let path = self.root.join(key);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::BlobError {
                key: key.to_string(),
                message: format!("read {}: {}", path.display(), e),
            })
    }
}

/// In-memory blob source for tests.
#[derive(Default)]
pub struct MemBlobSource {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemBlobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, text: impl Into<String>) {
        self.blobs.write().await.insert(key.into(), text.into());
    }
}

#[async_trait]
impl BlobSource for MemBlobSource {
    async fn fetch_text(&self, key: &str) -> Result<String> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::BlobError {
                key: key.to_string(),
                message: "blob not found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mem_blob_round_trip() {
        let blobs = MemBlobSource::new();
        blobs.insert("projects/1/doc.txt", "hello").await;
        assert_eq!(blobs.fetch_text("projects/1/doc.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_missing_blob_is_an_error() {
        let blobs = MemBlobSource::new();
        let err = blobs.fetch_text("nope").await.unwrap_err();
        assert!(matches!(err, AppError::BlobError { .. }));
    }

    #[tokio::test]
    async fn test_local_blob_missing_file() {
        let local = LocalBlobSource::new("/nonexistent-root");
        assert!(local.fetch_text("doc.txt").await.is_err());
    }
}
