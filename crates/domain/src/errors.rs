//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for diagsync
///
/// Infrastructure errors (`HttpError`, `StoreError`, ...) convert into this
/// type at the crate boundary so callers deal with one enum.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum DiagSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    /// A response arrived outside the caller's accepted status set.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A protected file failed its integrity check.
    #[error("Tampered: {0}")]
    Tampered(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiagSyncError {
    /// Stable label suitable for structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Network(_) => "network",
            Self::Http(_) => "http",
            Self::Tampered(_) => "tampered",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for DiagSyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for diagsync operations
pub type Result<T> = std::result::Result<T, DiagSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let err = DiagSyncError::Tampered("index.json".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"type":"Tampered","message":"index.json"}"#);
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(DiagSyncError::Network("x".into()).label(), "network");
        assert_eq!(DiagSyncError::NotFound("x".into()).label(), "not_found");
    }
}
