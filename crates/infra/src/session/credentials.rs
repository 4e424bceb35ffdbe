//! Hash-protected storage of the signed-in user and signing credentials

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use diagsync_domain::constants::CREDENTIALS_FILE_NAME;
use diagsync_domain::{CacheConfig, SessionUser};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::error::SessionResult;
use crate::cache::{ProtectedFiles, StoreError};
use crate::http::Credentials;

/// What survives a restart of a logged-in session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub user: SessionUser,
    #[serde(default)]
    pub session_id: Option<i64>,
    pub token: String,
    pub secret: String,
}

impl StoredSession {
    pub fn new(user: SessionUser, credentials: &Credentials, session_id: Option<i64>) -> Self {
        Self {
            user,
            session_id,
            token: credentials.user.clone(),
            secret: credentials.secret.clone(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.token.clone(), self.secret.clone())
    }
}

impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("user", &self.user.username)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    files: ProtectedFiles,
    tampered: AtomicBool,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, files: ProtectedFiles) -> Self {
        Self { path: path.into(), files, tampered: AtomicBool::new(false) }
    }

    /// Credentials file next to the diagram index, sharing the cache pepper.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.data_dir.join(CREDENTIALS_FILE_NAME),
            ProtectedFiles::new(config.pepper.clone()),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the last `load` found a file that failed its integrity check.
    pub fn was_tampered(&self) -> bool {
        self.tampered.load(Ordering::Relaxed)
    }

    /// The stored session, if any. A tampered or undecodable file is deleted
    /// and reported as no session.
    pub async fn load(&self) -> SessionResult<Option<StoredSession>> {
        self.tampered.store(false, Ordering::Relaxed);
        let bytes = match self.files.read(&self.path).await {
            Ok(bytes) => bytes,
            Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(StoreError::Tampered(path)) => {
                error!(path = %path.display(), "credential file failed integrity check; forcing login");
                self.tampered.store(true, Ordering::Relaxed);
                self.clear().await?;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(stored) => Ok(Some(stored)),
            Err(err) => {
                info!(error = %err, "discarding undecodable credential file");
                self.clear().await?;
                Ok(None)
            }
        }
    }

    pub async fn save(&self, session: &StoredSession) -> SessionResult<()> {
        let bytes = serde_json::to_vec(session).map_err(|e| StoreError::Serialization {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        self.files.write(&self.path, &bytes).await?;
        Ok(())
    }

    pub async fn clear(&self) -> SessionResult<()> {
        self.files.remove(&self.path).await?;
        Ok(())
    }
}
