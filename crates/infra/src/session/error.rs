use diagsync_domain::DiagSyncError;
use thiserror::Error;

use crate::cache::StoreError;
use crate::errors::InfraError;
use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("credential store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("not logged in")]
    NotLoggedIn,
}

impl From<SessionError> for InfraError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(err) => err.into(),
            SessionError::Http(err) => err.into(),
            SessionError::NotLoggedIn => InfraError(DiagSyncError::Auth("not logged in".into())),
        }
    }
}

impl From<SessionError> for DiagSyncError {
    fn from(err: SessionError) -> Self {
        InfraError::from(err).into()
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
