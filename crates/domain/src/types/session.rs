//! Session-side user types

use serde::{Deserialize, Serialize};

use super::diagram::{DiagramId, UserId};

/// Logged-in user as returned by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub free_diagram_id: Option<DiagramId>,
}

impl SessionUser {
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Copy of the user attached to a queued telemetry item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Login state published by a session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    LoggedOut,
    LoggedIn { user: SessionUser, session_id: Option<i64> },
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn { .. })
    }

    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            Self::LoggedIn { user, .. } => Some(user),
            Self::LoggedOut => None,
        }
    }

    pub fn session_id(&self) -> Option<i64> {
        match self {
            Self::LoggedIn { session_id, .. } => *session_id,
            Self::LoggedOut => None,
        }
    }
}
