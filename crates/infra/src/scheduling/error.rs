//! Timer lifecycle errors

use diagsync_domain::DiagSyncError;
use thiserror::Error;

use crate::errors::InfraError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("{0} already running")]
    AlreadyRunning(&'static str),

    #[error("{0} not running")]
    NotRunning(&'static str),

    #[error("{task} did not stop within {millis} ms")]
    Timeout { task: &'static str, millis: u64 },

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let mapped = match err {
            SchedulerError::AlreadyRunning(_) | SchedulerError::NotRunning(_) => {
                DiagSyncError::InvalidInput(err.to_string())
            }
            _ => DiagSyncError::Internal(err.to_string()),
        };
        InfraError(mapped)
    }
}

impl From<SchedulerError> for DiagSyncError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
