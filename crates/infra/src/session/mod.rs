//! Local login session and its persisted credentials

pub mod credentials;
pub mod error;
pub mod local;

pub use credentials::{CredentialStore, StoredSession};
pub use error::{SessionError, SessionResult};
pub use local::LocalSession;
