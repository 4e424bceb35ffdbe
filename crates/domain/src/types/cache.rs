//! UI-facing projection of the diagram mirror and its change notifications

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diagram::{DiagramId, DiagramMeta, DiagramRecord};
use crate::impl_domain_status_conversions;

/// One row of the file list, kept in lockstep with the cached record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndexEntry {
    pub id: DiagramId,
    pub path: PathBuf,
    pub name: String,
    pub owner: String,
    pub modified: DateTime<Utc>,
    pub shown: bool,
}

impl CacheIndexEntry {
    pub fn from_meta(meta: &DiagramMeta, path: PathBuf) -> Self {
        Self {
            id: meta.id,
            path,
            name: meta.display_name(),
            owner: meta.owner.username.clone(),
            modified: meta.saved_at(),
            shown: meta.shown,
        }
    }
}

/// Field group touched by an update, for scoped change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    Payload,
    Name,
    Owner,
    Modified,
    Visibility,
    Access,
}

impl_domain_status_conversions!(ChangedField {
    Payload => "payload",
    Name => "name",
    Owner => "owner",
    Modified => "modified",
    Visibility => "visibility",
    Access => "access",
});

impl ChangedField {
    /// Field groups that differ between two versions of the same diagram.
    pub fn diff(old: &DiagramRecord, new: &DiagramRecord) -> Vec<Self> {
        let (a, b) = (&old.meta, &new.meta);
        let mut fields = Vec::new();
        if old.payload != new.payload {
            fields.push(Self::Payload);
        }
        if a.name != b.name
            || a.alias != b.alias
            || a.use_real_names != b.use_real_names
            || a.require_password_for_real_names != b.require_password_for_real_names
        {
            fields.push(Self::Name);
        }
        if a.owner != b.owner {
            fields.push(Self::Owner);
        }
        if a.saved_at() != b.saved_at() {
            fields.push(Self::Modified);
        }
        if a.shown != b.shown {
            fields.push(Self::Visibility);
        }
        if a.access_grants != b.access_grants {
            fields.push(Self::Access);
        }
        fields
    }
}

/// Notification emitted by the cache reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Added(DiagramId),
    Changed { id: DiagramId, fields: Vec<ChangedField> },
    Removed(DiagramId),
    /// Every entry was dropped (logout, index failure, tampered index).
    Cleared,
    /// A reconcile cycle finished; fired once per cycle.
    UpdateFinished,
}
