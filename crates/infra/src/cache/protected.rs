//! Hash-protected files
//!
//! Every protected file `name` has a sidecar `name.protect` holding
//! `hex(sha256(pepper || bytes))`. A missing sidecar or a mismatching hash is
//! reported as [`StoreError::Tampered`], never as a decode failure.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use diagsync_domain::constants::HASH_SUFFIX;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("protected file tampered with: {}", .0.display())]
    Tampered(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {message}", path.display())]
    Serialization { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }

    pub fn is_tampered(&self) -> bool {
        matches!(self, Self::Tampered(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// `path` with `suffix` appended to its file name (`a.json` -> `a.json.tmp`).
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Clone)]
pub struct ProtectedFiles {
    pepper: String,
}

impl std::fmt::Debug for ProtectedFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedFiles").finish_non_exhaustive()
    }
}

impl ProtectedFiles {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self { pepper: pepper.into() }
    }

    pub fn hash_for(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn sidecar_path(path: &Path) -> PathBuf {
        with_suffix(path, HASH_SUFFIX)
    }

    /// Write `bytes` atomically (temp file + rename), then its sidecar.
    #[instrument(skip(self, bytes), fields(path = %path.display(), len = bytes.len()))]
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| StoreError::io(parent, e))?;
        }

        let temp_path = with_suffix(path, "tmp");
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(bytes).await.map_err(|e| StoreError::io(&temp_path, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, path).await.map_err(|e| StoreError::io(path, e))?;

        let sidecar = Self::sidecar_path(path);
        fs::write(&sidecar, self.hash_for(bytes)).await.map_err(|e| StoreError::io(&sidecar, e))?;

        debug!("protected file written");
        Ok(())
    }

    /// Read `path` and verify it against its sidecar.
    pub async fn read(&self, path: &Path) -> StoreResult<Vec<u8>> {
        let bytes = fs::read(path).await.map_err(|e| StoreError::io(path, e))?;

        let sidecar = Self::sidecar_path(path);
        let on_disk = match fs::read_to_string(&sidecar).await {
            Ok(hash) => hash,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Tampered(path.to_path_buf()))
            }
            Err(e) => return Err(StoreError::io(&sidecar, e)),
        };

        if on_disk.trim() != self.hash_for(&bytes) {
            return Err(StoreError::Tampered(path.to_path_buf()));
        }
        Ok(bytes)
    }

    /// Remove a protected file and its sidecar; missing files are fine.
    pub async fn remove(&self, path: &Path) -> StoreResult<()> {
        for target in [path.to_path_buf(), Self::sidecar_path(path)] {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&target, e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn write_then_read_verifies() {
        let dir = TempDir::new().unwrap();
        let files = ProtectedFiles::new("pepper");
        let path = dir.path().join("nested/index.json");

        files.write(&path, b"[1,2,3]").await.unwrap();
        assert_eq!(files.read(&path).await.unwrap(), b"[1,2,3]");
        assert!(ProtectedFiles::sidecar_path(&path).exists());
        assert!(!with_suffix(&path, "tmp").exists());
    }

    #[tokio::test]
    async fn flipped_byte_is_tampered() {
        let dir = TempDir::new().unwrap();
        let files = ProtectedFiles::new("pepper");
        let path = dir.path().join("diagram.bin");
        files.write(&path, b"payload").await.unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        assert!(files.read(&path).await.unwrap_err().is_tampered());
    }

    #[tokio::test]
    async fn missing_sidecar_is_tampered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diagram.bin");
        std::fs::write(&path, b"payload").unwrap();

        let err = ProtectedFiles::new("pepper").read(&path).await.unwrap_err();
        assert!(err.is_tampered());
    }

    #[tokio::test]
    async fn different_pepper_is_tampered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diagram.bin");
        ProtectedFiles::new("a").write(&path, b"payload").await.unwrap();

        assert!(ProtectedFiles::new("b").read(&path).await.unwrap_err().is_tampered());
    }

    #[tokio::test]
    async fn remove_tolerates_missing_files() {
        let dir = TempDir::new().unwrap();
        let files = ProtectedFiles::new("pepper");
        let path = dir.path().join("gone.bin");
        files.remove(&path).await.unwrap();

        files.write(&path, b"x").await.unwrap();
        files.remove(&path).await.unwrap();
        assert!(!path.exists());
        assert!(!ProtectedFiles::sidecar_path(&path).exists());
    }
}
