//! On-disk layout of the diagram mirror
//!
//! ```text
//! <root>/index.json                 list of DiagramMeta
//! <root>/index.json.protect
//! <root>/<id>.fd/diagram.bin        opaque payload
//! <root>/<id>.fd/diagram.bin.protect
//! ```

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use diagsync_domain::constants::{DIAGRAM_DIR_EXTENSION, INDEX_FILE_NAME, PAYLOAD_FILE_NAME};
use diagsync_domain::{DiagramId, DiagramMeta, DiagramRecord};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::protected::{ProtectedFiles, StoreError, StoreResult};

/// What survived a startup load
#[derive(Debug, Default)]
pub struct LoadedCache {
    pub records: Vec<DiagramRecord>,
    /// Index entries discarded because their payload was missing or tampered
    pub dropped: Vec<DiagramId>,
    /// The index file itself failed verification and was reset
    pub index_reset: bool,
}

#[derive(Debug)]
pub struct DiagramStore {
    root: PathBuf,
    files: ProtectedFiles,
    // serializes every write so disk converges to the latest in-memory state
    write_lock: Mutex<()>,
}

impl DiagramStore {
    pub fn new(root: impl Into<PathBuf>, pepper: impl Into<String>) -> Self {
        Self { root: root.into(), files: ProtectedFiles::new(pepper), write_lock: Mutex::new(()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    pub fn diagram_dir(&self, id: DiagramId) -> PathBuf {
        self.root.join(format!("{id}.{DIAGRAM_DIR_EXTENSION}"))
    }

    pub fn payload_path(&self, id: DiagramId) -> PathBuf {
        self.diagram_dir(id).join(PAYLOAD_FILE_NAME)
    }

    /// Id encoded in a diagram directory name, e.g. `42.fd`.
    pub fn id_for_dir_name(name: &str) -> Option<DiagramId> {
        name.strip_suffix(DIAGRAM_DIR_EXTENSION)?.strip_suffix('.')?.parse().ok()
    }

    /// Write the payload returned by `snapshot`, or remove the diagram when it
    /// returns `None`. `snapshot` runs under the write lock.
    pub async fn sync_payload<F>(&self, id: DiagramId, snapshot: F) -> StoreResult<()>
    where
        F: FnOnce() -> Option<Vec<u8>>,
    {
        let _guard = self.write_lock.lock().await;
        match snapshot() {
            Some(payload) => self.files.write(&self.payload_path(id), &payload).await,
            None => self.remove_dir(id).await,
        }
    }

    /// Write the index returned by `snapshot`. `snapshot` runs under the write
    /// lock.
    pub async fn sync_index<F>(&self, snapshot: F) -> StoreResult<()>
    where
        F: FnOnce() -> Vec<DiagramMeta>,
    {
        let _guard = self.write_lock.lock().await;
        let metas = snapshot();
        let bytes = serde_json::to_vec_pretty(&metas).map_err(|e| StoreError::Serialization {
            path: self.index_path(),
            message: e.to_string(),
        })?;
        self.files.write(&self.index_path(), &bytes).await?;
        debug!(entries = metas.len(), "cache index written");
        Ok(())
    }

    pub async fn read_payload(&self, id: DiagramId) -> StoreResult<Vec<u8>> {
        self.files.read(&self.payload_path(id)).await
    }

    /// `Ok(None)` when no index file exists yet.
    pub async fn read_index(&self) -> StoreResult<Option<Vec<DiagramMeta>>> {
        let path = self.index_path();
        match fs::metadata(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        }
        let bytes = self.files.read(&path).await?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Serialization { path, message: e.to_string() })
    }

    /// Ids of every `<id>.fd` directory under the root.
    pub async fn disk_ids(&self) -> StoreResult<Vec<DiagramId>> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(&self.root, e))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = Self::id_for_dir_name(name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Remove every diagram directory and the index.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn clear(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        for id in self.disk_ids().await? {
            self.remove_dir(id).await?;
        }
        self.files.remove(&self.index_path()).await
    }

    /// Load the mirror, reconciling the index file with what is on disk.
    ///
    /// Index entries without a directory are dropped, directories without an
    /// index entry are deleted, and tampered payloads are deleted so the next
    /// reconcile pulls them again. A tampered or unreadable index resets the
    /// whole mirror.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn load(&self) -> StoreResult<LoadedCache> {
        fs::create_dir_all(&self.root).await.map_err(|e| StoreError::io(&self.root, e))?;

        let index = match self.read_index().await {
            Ok(index) => index.unwrap_or_default(),
            Err(err @ (StoreError::Tampered(_) | StoreError::Serialization { .. })) => {
                error!(error = %err, "cache index rejected; resetting mirror");
                self.clear().await?;
                return Ok(LoadedCache { index_reset: true, ..LoadedCache::default() });
            }
            Err(err) => return Err(err),
        };

        let disk: HashSet<DiagramId> = self.disk_ids().await?.into_iter().collect();
        let indexed: HashSet<DiagramId> = index.iter().map(|meta| meta.id).collect();

        for orphan in disk.difference(&indexed) {
            debug!(diagram_id = orphan, "removing directory without index entry");
            self.remove_dir(*orphan).await?;
        }

        let mut loaded = LoadedCache::default();
        for meta in index {
            let id = meta.id;
            if !disk.contains(&id) {
                loaded.dropped.push(id);
                continue;
            }
            match self.read_payload(id).await {
                Ok(payload) => loaded.records.push(DiagramRecord::new(meta, payload)),
                Err(err) => {
                    if err.is_tampered() {
                        error!(diagram_id = id, error = %err, "cached diagram tampered; discarding");
                    } else {
                        warn!(diagram_id = id, error = %err, "cached diagram unreadable; discarding");
                    }
                    self.remove_dir(id).await?;
                    loaded.dropped.push(id);
                }
            }
        }

        info!(
            loaded = loaded.records.len(),
            dropped = loaded.dropped.len(),
            "diagram mirror loaded from disk"
        );
        Ok(loaded)
    }

    async fn remove_dir(&self, id: DiagramId) -> StoreResult<()> {
        let dir = self.diagram_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use diagsync_domain::DiagramOwner;
    use tempfile::TempDir;

    use super::*;

    fn meta(id: DiagramId) -> DiagramMeta {
        DiagramMeta {
            id,
            owner: DiagramOwner { id: 1, username: "pat@example.com".into(), free_diagram_id: None },
            access_grants: Vec::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: None,
            name: Some(format!("diagram {id}")),
            alias: None,
            use_real_names: false,
            require_password_for_real_names: false,
            shown: true,
        }
    }

    async fn seeded(dir: &TempDir, ids: &[DiagramId]) -> DiagramStore {
        let store = DiagramStore::new(dir.path(), "pepper");
        for id in ids {
            store.sync_payload(*id, || Some(format!("payload {id}").into_bytes())).await.unwrap();
        }
        let metas: Vec<DiagramMeta> = ids.iter().map(|id| meta(*id)).collect();
        store.sync_index(|| metas).await.unwrap();
        store
    }

    #[test]
    fn parses_directory_names() {
        assert_eq!(DiagramStore::id_for_dir_name("42.fd"), Some(42));
        assert_eq!(DiagramStore::id_for_dir_name("42.fdx"), None);
        assert_eq!(DiagramStore::id_for_dir_name("index.json"), None);
    }

    #[tokio::test]
    async fn load_round_trips_records() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir, &[1, 2]).await;

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].payload, b"payload 1");
        assert!(loaded.dropped.is_empty());
    }

    #[tokio::test]
    async fn load_syncs_index_with_disk() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir, &[1, 2]).await;
        // directory removed by hand
        std::fs::remove_dir_all(store.diagram_dir(2)).unwrap();
        // directory with no index entry
        store.sync_payload(9, || Some(b"stray".to_vec())).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.dropped, vec![2]);
        assert!(!store.diagram_dir(9).exists());
    }

    #[tokio::test]
    async fn tampered_payload_is_discarded() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir, &[5, 6]).await;
        let path = store.payload_path(5);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[3] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.records.iter().map(DiagramRecord::id).collect::<Vec<_>>(), vec![6]);
        assert_eq!(loaded.dropped, vec![5]);
        assert!(!store.diagram_dir(5).exists());
    }

    #[tokio::test]
    async fn tampered_index_resets_everything() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir, &[1]).await;
        std::fs::write(store.index_path(), b"[]").unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.index_reset);
        assert!(loaded.records.is_empty());
        assert!(!store.diagram_dir(1).exists());
        assert!(!store.index_path().exists());
    }

    #[tokio::test]
    async fn sync_payload_none_removes_directory() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir, &[3]).await;
        store.sync_payload(3, || None).await.unwrap();
        assert!(!store.diagram_dir(3).exists());
    }
}
