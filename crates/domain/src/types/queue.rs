//! Telemetry/log items held by the delivery queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::session::UserSnapshot;
use crate::impl_domain_status_conversions;

/// What a queued item records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Application log line or captured error
    Log,
    /// User action tracked by the session
    Action,
}

impl_domain_status_conversions!(ItemKind {
    Log => "log",
    Action => "action",
});

/// Severity attached to a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl_domain_status_conversions!(LogStatus {
    Debug => "debug",
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
});

/// Immutable telemetry record. Lives in the queue until a delivery that
/// included it is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub insert_id: Uuid,
    pub kind: ItemKind,
    pub message: String,
    pub time: DateTime<Utc>,
    pub status: LogStatus,
    #[serde(default)]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub user: Option<UserSnapshot>,
    #[serde(default)]
    pub log_text: Option<String>,
    /// Items sharing a key replace each other in the queue.
    #[serde(default)]
    pub replace_key: Option<String>,
}

impl QueueItem {
    fn new(kind: ItemKind, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            insert_id: Uuid::new_v4(),
            kind,
            message: message.into(),
            time: Utc::now(),
            status,
            session_id: None,
            user: None,
            log_text: None,
            replace_key: None,
        }
    }

    pub fn log(status: LogStatus, message: impl Into<String>) -> Self {
        Self::new(ItemKind::Log, status, message)
    }

    pub fn action(name: impl Into<String>) -> Self {
        Self::new(ItemKind::Action, LogStatus::Info, name)
    }

    pub fn with_session(mut self, session_id: Option<i64>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_user(mut self, user: Option<UserSnapshot>) -> Self {
        self.user = user;
        self
    }

    pub fn with_log_text(mut self, text: impl Into<String>) -> Self {
        self.log_text = Some(text.into());
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Mark this item as "latest value wins" under `key`.
    pub fn replacing(mut self, key: impl Into<String>) -> Self {
        self.replace_key = Some(key.into());
        self
    }

    /// Flatten into one ingestion record. Nested user fields become dotted
    /// keys; absent optionals are omitted.
    pub fn to_record(&self, context: &RecordContext) -> Value {
        let mut record = Map::new();
        record.insert("message".into(), Value::from(self.message.clone()));
        record.insert("status".into(), Value::from(self.status.to_string()));
        record.insert("date".into(), Value::from(self.time.timestamp_millis()));
        record.insert("ddsource".into(), Value::from(context.source.clone()));
        record.insert("service".into(), Value::from(context.service.clone()));
        record.insert("version".into(), Value::from(context.version.clone()));
        record.insert("fdtype".into(), Value::from(self.kind.to_string()));
        record.insert("insert_id".into(), Value::from(self.insert_id.to_string()));
        if let Some(hostname) = &context.hostname {
            record.insert("hostname".into(), Value::from(hostname.clone()));
        }
        if let Some(session_id) = self.session_id {
            record.insert("session_id".into(), Value::from(session_id));
        }
        if let Some(text) = &self.log_text {
            record.insert("log_txt".into(), Value::from(text.clone()));
        }
        if let Some(user) = &self.user {
            record.insert("user.id".into(), Value::from(user.id));
            record.insert("user.username".into(), Value::from(user.username.clone()));
            record.insert("user.first_name".into(), Value::from(user.first_name.clone()));
            record.insert("user.last_name".into(), Value::from(user.last_name.clone()));
            record.insert("user.roles".into(), Value::from(user.roles.clone()));
        }
        Value::Object(record)
    }
}

/// Static fields stamped on every flattened record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
    pub service: String,
    pub source: String,
    pub version: String,
    pub hostname: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn context() -> RecordContext {
        RecordContext {
            service: "diagsync".into(),
            source: "desktop".into(),
            version: "2.1.0".into(),
            hostname: None,
        }
    }

    #[test]
    fn flattens_user_into_dotted_keys() {
        let user = UserSnapshot {
            id: 42,
            username: "pat@example.com".into(),
            first_name: "Pat".into(),
            last_name: "Lee".into(),
            roles: vec!["subscriber".into()],
        };
        let item = QueueItem::action("opened_diagram").with_session(Some(99)).with_user(Some(user));
        let record = item.to_record(&context());

        assert_eq!(record["message"], "opened_diagram");
        assert_eq!(record["fdtype"], "action");
        assert_eq!(record["status"], "info");
        assert_eq!(record["session_id"], 99);
        assert_eq!(record["user.username"], "pat@example.com");
        assert_eq!(record["user.roles"][0], "subscriber");
        assert!(record.get("user").is_none());
    }

    #[test]
    fn omits_absent_optionals() {
        let record = QueueItem::log(LogStatus::Error, "boom").to_record(&context());
        let object = record.as_object().unwrap();
        assert!(!object.contains_key("session_id"));
        assert!(!object.contains_key("log_txt"));
        assert!(!object.contains_key("hostname"));
        assert!(!object.contains_key("user.id"));
    }

    #[test]
    fn every_item_gets_a_distinct_insert_id() {
        let a = QueueItem::log(LogStatus::Info, "same");
        let b = QueueItem::log(LogStatus::Info, "same");
        assert_ne!(a.insert_id, b.insert_id);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(LogStatus::from_str("WARNING").unwrap(), LogStatus::Warning);
        assert!(LogStatus::Critical > LogStatus::Error);
    }
}
