//! Durable storage for the delivery queue
//!
//! The queue is one hash-protected JSON array. A missing file is an empty
//! queue; a tampered or undecodable file is discarded.

use std::path::{Path, PathBuf};

use diagsync_domain::QueueItem;
use tracing::{debug, warn};

use crate::cache::{ProtectedFiles, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct QueueFile {
    path: PathBuf,
    files: ProtectedFiles,
}

impl QueueFile {
    pub fn new(path: impl Into<PathBuf>, files: ProtectedFiles) -> Self {
        Self { path: path.into(), files }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Items in queue order. Never fails: unreadable state starts empty.
    pub async fn load(&self) -> Vec<QueueItem> {
        match self.try_load().await {
            Ok(items) => items,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "discarding unreadable delivery queue");
                if let Err(err) = self.files.remove(&self.path).await {
                    warn!(error = %err, "failed to remove delivery queue file");
                }
                Vec::new()
            }
        }
    }

    async fn try_load(&self) -> StoreResult<Vec<QueueItem>> {
        let bytes = match self.files.read(&self.path).await {
            Ok(bytes) => bytes,
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted delivery queue");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization { path: self.path.clone(), message: e.to_string() })
    }

    pub async fn save(&self, items: &[QueueItem]) -> StoreResult<()> {
        let bytes = serde_json::to_vec(items)
            .map_err(|e| StoreError::Serialization { path: self.path.clone(), message: e.to_string() })?;
        self.files.write(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use diagsync_domain::LogStatus;
    use tempfile::TempDir;

    use super::*;

    fn queue_file(dir: &TempDir) -> QueueFile {
        QueueFile::new(dir.path().join("queue.json"), ProtectedFiles::new("pepper"))
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_queue() {
        let dir = TempDir::new().unwrap();
        assert!(queue_file(&dir).load().await.is_empty());
    }

    #[tokio::test]
    async fn saved_items_reload_in_order() {
        let dir = TempDir::new().unwrap();
        let file = queue_file(&dir);
        let items: Vec<QueueItem> =
            (0..5).map(|i| QueueItem::log(LogStatus::Info, format!("line {i}"))).collect();

        file.save(&items).await.unwrap();
        assert_eq!(file.load().await, items);
    }

    #[tokio::test]
    async fn tampered_queue_starts_empty_and_is_removed() {
        let dir = TempDir::new().unwrap();
        let file = queue_file(&dir);
        file.save(&[QueueItem::action("opened")]).await.unwrap();

        let mut bytes = std::fs::read(file.path()).unwrap();
        bytes[2] ^= 0x01;
        std::fs::write(file.path(), bytes).unwrap();

        assert!(file.load().await.is_empty());
        assert!(!file.path().exists());
    }
}
