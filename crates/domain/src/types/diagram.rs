//! Diagram records mirrored from the server
//!
//! The payload is opaque to this crate. Everything else is metadata used to
//! decide staleness, display the file list, and answer access checks locally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{FREE_DIAGRAM_NAME, UNNAMED_DIAGRAM};
use crate::impl_domain_status_conversions;
use crate::utils::base64_bytes;

/// Server-assigned diagram identifier
pub type DiagramId = i64;

/// Server-assigned user identifier
pub type UserId = i64;

/// Right granted to a user on someone else's diagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRight {
    ReadOnly,
    ReadWrite,
}

impl_domain_status_conversions!(AccessRight {
    ReadOnly => "read_only",
    ReadWrite => "read_write",
});

impl AccessRight {
    /// Whether holding `self` is enough for an operation requiring `required`.
    pub fn satisfies(self, required: Self) -> bool {
        match required {
            Self::ReadOnly => true,
            Self::ReadWrite => self == Self::ReadWrite,
        }
    }
}

/// `(user_id, right)` pair scoped to one diagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    #[serde(default)]
    pub id: Option<i64>,
    pub user_id: UserId,
    pub right: AccessRight,
}

/// Owner snapshot embedded in every diagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramOwner {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub free_diagram_id: Option<DiagramId>,
}

fn default_shown() -> bool {
    true
}

/// Payload-free diagram metadata; this is what the cache index file stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramMeta {
    pub id: DiagramId,
    #[serde(rename = "user")]
    pub owner: DiagramOwner,
    #[serde(rename = "access_rights", default)]
    pub access_grants: Vec<AccessGrant>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub use_real_names: bool,
    #[serde(default)]
    pub require_password_for_real_names: bool,
    #[serde(default = "default_shown")]
    pub shown: bool,
}

impl DiagramMeta {
    /// `max(updated_at, created_at)`, the only staleness comparator.
    pub fn saved_at(&self) -> DateTime<Utc> {
        match self.updated_at {
            Some(updated) if updated > self.created_at => updated,
            _ => self.created_at,
        }
    }

    /// Local access check; the owner holds every right.
    pub fn check_access(&self, user_id: UserId, right: AccessRight) -> bool {
        if user_id == self.owner.id {
            return true;
        }
        self.access_grants
            .iter()
            .any(|grant| grant.user_id == user_id && grant.right.satisfies(right))
    }

    pub fn is_free_diagram(&self) -> bool {
        self.owner.free_diagram_id == Some(self.id)
    }

    /// Name shown in the file list.
    pub fn display_name(&self) -> String {
        if self.is_free_diagram() {
            return FREE_DIAGRAM_NAME.to_string();
        }
        match (&self.name, &self.alias) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(alias)) if !alias.is_empty() => format!("[{alias}]"),
            _ => UNNAMED_DIAGRAM.to_string(),
        }
    }
}

/// A full diagram: metadata plus opaque payload.
///
/// On the wire the payload travels as base64 in the `data` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramRecord {
    #[serde(flatten)]
    pub meta: DiagramMeta,
    #[serde(rename = "data", with = "base64_bytes", default)]
    pub payload: Vec<u8>,
}

impl DiagramRecord {
    pub fn new(meta: DiagramMeta, payload: Vec<u8>) -> Self {
        Self { meta, payload }
    }

    pub fn id(&self) -> DiagramId {
        self.meta.id
    }

    pub fn saved_at(&self) -> DateTime<Utc> {
        self.meta.saved_at()
    }
}

/// One row of the server index. Extra fields sent by the server are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: DiagramId,
    pub saved_at: DateTime<Utc>,
}
