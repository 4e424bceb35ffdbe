//! Configuration structures
//!
//! Deserialized from environment variables or a JSON/TOML file by
//! `diagsync_infra::config`. Every section has serde defaults so a file only
//! needs the values that differ.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BLOCKING_TIMEOUT_MS, DEFAULT_DELIVERY_BATCH_MAX, DEFAULT_DELIVERY_RETRY_MS,
    DEFAULT_DELIVERY_SHUTDOWN_MS, DEFAULT_SYNC_INTERVAL_SECS, QUEUE_FILE_NAME,
};
use crate::errors::{DiagSyncError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.trim().is_empty() {
            return Err(DiagSyncError::Config("server.base_url must be set".into()));
        }
        if self.cache.pepper.is_empty() {
            return Err(DiagSyncError::Config("cache.pepper must be set".into()));
        }
        if self.delivery.batch_max == 0 {
            return Err(DiagSyncError::Config("delivery.batch_max must be positive".into()));
        }
        if self.delivery.enabled && self.delivery.endpoint.trim().is_empty() {
            return Err(DiagSyncError::Config(
                "delivery.endpoint must be set when delivery is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Signed API server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL, e.g. `https://api.example.com/v1`
    pub base_url: String,
    /// Sent in the client-version header on every request
    pub client_version: String,
    /// Transport-level timeout for a single request
    pub request_timeout_ms: u64,
    /// Default wait for `blocking_request`
    pub blocking_timeout_ms: u64,
    /// Public credential used for anonymous calls
    pub anonymous_user: String,
    pub anonymous_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout_ms: 30_000,
            blocking_timeout_ms: DEFAULT_BLOCKING_TIMEOUT_MS,
            anonymous_user: "anonymous".to_string(),
            anonymous_secret: "anonymous".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }
}

/// Local diagram mirror settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the index file and one directory per diagram
    pub data_dir: PathBuf,
    /// Mixed into every integrity hash
    pub pepper: String,
    /// Period of the background reconcile timer
    pub sync_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Server"),
            pepper: String::new(),
            sync_interval_seconds: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }
}

/// Telemetry/log delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Ingestion URL receiving one POST per batch
    pub endpoint: String,
    pub api_key: String,
    pub enabled: bool,
    /// Largest number of items sent in one request
    pub batch_max: usize,
    pub retry_interval_ms: u64,
    /// Upper bound on the shutdown wait for an in-flight batch
    pub shutdown_timeout_ms: u64,
    pub queue_path: PathBuf,
    /// Attached to every flattened record
    pub service: String,
    pub source: String,
    pub hostname: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            enabled: true,
            batch_max: DEFAULT_DELIVERY_BATCH_MAX,
            retry_interval_ms: DEFAULT_DELIVERY_RETRY_MS,
            shutdown_timeout_ms: DEFAULT_DELIVERY_SHUTDOWN_MS,
            queue_path: PathBuf::from(QUEUE_FILE_NAME),
            service: "diagsync".to_string(),
            source: "desktop".to_string(),
            hostname: None,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
    /// Events at or above this level are forwarded to the delivery queue
    pub forward_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false, forward_level: "warn".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.server.base_url = "https://api.example.com".into();
        config.cache.pepper = "pepper".into();
        config.delivery.endpoint = "https://intake.example.com/v1/input".into();
        config
    }

    #[test]
    fn defaults_validate_once_required_fields_are_set() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn missing_pepper_is_a_config_error() {
        let mut config = valid();
        config.cache.pepper.clear();
        assert!(matches!(config.validate(), Err(DiagSyncError::Config(_))));
    }

    #[test]
    fn disabled_delivery_does_not_need_endpoint() {
        let mut config = valid();
        config.delivery.endpoint.clear();
        config.delivery.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server": {"base_url": "https://x"}}"#).unwrap();
        assert_eq!(config.server.base_url, "https://x");
        assert_eq!(config.server.blocking_timeout_ms, DEFAULT_BLOCKING_TIMEOUT_MS);
        assert_eq!(config.delivery.batch_max, DEFAULT_DELIVERY_BATCH_MAX);
        assert_eq!(config.cache.sync_interval(), Duration::from_secs(1800));
    }
}
