//! Domain data types

pub mod cache;
pub mod diagram;
pub mod queue;
pub mod session;

pub use cache::{CacheEvent, CacheIndexEntry, ChangedField};
pub use diagram::{
    AccessGrant, AccessRight, DiagramId, DiagramMeta, DiagramOwner, DiagramRecord, IndexEntry,
    UserId,
};
pub use queue::{ItemKind, LogStatus, QueueItem, RecordContext};
pub use session::{SessionState, SessionUser, UserSnapshot};
