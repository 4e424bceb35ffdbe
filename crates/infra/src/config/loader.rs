//! Configuration loader
//!
//! Loads configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Loads a `.env` file if present (`dotenvy`)
//! 2. Attempts to build the configuration from environment variables
//! 3. If a required variable is missing, falls back to a config file
//! 4. Probes multiple paths for config files (JSON or TOML)
//!
//! ## Environment Variables
//! - `DIAGSYNC_SERVER_URL` (required): API base URL
//! - `DIAGSYNC_CACHE_PEPPER` (required): integrity hash pepper
//! - `DIAGSYNC_CLIENT_VERSION`: sent in the client-version header
//! - `DIAGSYNC_DATA_DIR`: cache directory
//! - `DIAGSYNC_SYNC_INTERVAL`: reconcile period in seconds
//! - `DIAGSYNC_DELIVERY_ENDPOINT`: telemetry ingestion URL
//! - `DIAGSYNC_DELIVERY_API_KEY`: telemetry API key
//! - `DIAGSYNC_DELIVERY_ENABLED`: whether telemetry is delivered (true/false)
//! - `DIAGSYNC_LOG_LEVEL`: default tracing filter
//! - `DIAGSYNC_LOG_JSON`: JSON log output (true/false)
//!
//! ## File Locations
//! 1. `./diagsync.{json,toml}` then `./config.{json,toml}`
//! 2. The same names in the parent and grandparent directories
//! 3. Relative to the executable location

use std::path::{Path, PathBuf};

use diagsync_domain::{Config, DiagSyncError, Result};

const FILE_NAMES: [&str; 4] = ["diagsync.json", "diagsync.toml", "config.json", "config.toml"];

/// Load configuration, preferring the environment over files.
///
/// # Errors
/// Returns `DiagSyncError::Config` if neither source yields a valid
/// configuration.
pub fn load() -> Result<Config> {
    if let Err(err) = dotenvy::dotenv() {
        tracing::debug!(error = %err, "No .env file loaded");
    }

    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Build configuration from `DIAGSYNC_*` variables.
///
/// # Errors
/// Returns `DiagSyncError::Config` if a required variable is missing or a
/// value does not parse.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    config.server.base_url = env_var("DIAGSYNC_SERVER_URL")?;
    config.cache.pepper = env_var("DIAGSYNC_CACHE_PEPPER")?;

    if let Some(version) = env_opt("DIAGSYNC_CLIENT_VERSION") {
        config.server.client_version = version;
    }
    if let Some(dir) = env_opt("DIAGSYNC_DATA_DIR") {
        config.cache.data_dir = PathBuf::from(dir);
    }
    if let Some(interval) = env_opt("DIAGSYNC_SYNC_INTERVAL") {
        config.cache.sync_interval_seconds = interval.parse::<u64>().map_err(|e| {
            DiagSyncError::Config(format!("Invalid sync interval: {}", e))
        })?;
    }
    if let Some(endpoint) = env_opt("DIAGSYNC_DELIVERY_ENDPOINT") {
        config.delivery.endpoint = endpoint;
    }
    if let Some(key) = env_opt("DIAGSYNC_DELIVERY_API_KEY") {
        config.delivery.api_key = key;
    }
    config.delivery.enabled = env_bool("DIAGSYNC_DELIVERY_ENABLED", config.delivery.enabled);
    if let Some(level) = env_opt("DIAGSYNC_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("DIAGSYNC_LOG_JSON", config.logging.json);

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file.
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `DiagSyncError::Config` if the file is missing, malformed or
/// fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(DiagSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            DiagSyncError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| DiagSyncError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Format is detected by extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| DiagSyncError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| DiagSyncError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(DiagSyncError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// First existing config file among the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.clone());
        roots.push(cwd.join(".."));
        roots.push(cwd.join("../.."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
            roots.push(exe_dir.join(".."));
        }
    }

    roots
        .iter()
        .flat_map(|root| FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        DiagSyncError::Config(format!("Missing required environment variable: {}", key))
    })
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: [&str; 10] = [
        "DIAGSYNC_SERVER_URL",
        "DIAGSYNC_CACHE_PEPPER",
        "DIAGSYNC_CLIENT_VERSION",
        "DIAGSYNC_DATA_DIR",
        "DIAGSYNC_SYNC_INTERVAL",
        "DIAGSYNC_DELIVERY_ENDPOINT",
        "DIAGSYNC_DELIVERY_API_KEY",
        "DIAGSYNC_DELIVERY_ENABLED",
        "DIAGSYNC_LOG_LEVEL",
        "DIAGSYNC_LOG_JSON",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn temp_config(contents: &str, extension: &str) -> PathBuf {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        let path = temp_file.path().with_extension(extension);
        std::fs::copy(temp_file.path(), &path).unwrap();
        path
    }

    #[test]
    fn env_bool_accepts_common_spellings() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        std::env::set_var("DIAGSYNC_TEST_BOOL_YES", "YES");
        std::env::set_var("DIAGSYNC_TEST_BOOL_OFF", "off");
        assert!(env_bool("DIAGSYNC_TEST_BOOL_YES", false));
        assert!(!env_bool("DIAGSYNC_TEST_BOOL_OFF", true));

        std::env::remove_var("DIAGSYNC_TEST_BOOL_MISSING");
        assert!(env_bool("DIAGSYNC_TEST_BOOL_MISSING", true));

        std::env::remove_var("DIAGSYNC_TEST_BOOL_YES");
        std::env::remove_var("DIAGSYNC_TEST_BOOL_OFF");
    }

    #[test]
    fn loads_from_env_with_defaults_for_optional_vars() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("DIAGSYNC_SERVER_URL", "https://api.example.com/v1");
        std::env::set_var("DIAGSYNC_CACHE_PEPPER", "salty");
        std::env::set_var("DIAGSYNC_SYNC_INTERVAL", "60");
        std::env::set_var("DIAGSYNC_DELIVERY_ENABLED", "false");
        std::env::set_var("DIAGSYNC_LOG_JSON", "1");

        let config = load_from_env().expect("config from env");
        assert_eq!(config.server.base_url, "https://api.example.com/v1");
        assert_eq!(config.cache.pepper, "salty");
        assert_eq!(config.cache.sync_interval_seconds, 60);
        assert!(!config.delivery.enabled);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");

        clear_env();
    }

    #[test]
    fn missing_required_var_is_config_error() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();
        std::env::set_var("DIAGSYNC_SERVER_URL", "https://api.example.com");

        let err = load_from_env().unwrap_err();
        assert!(matches!(err, DiagSyncError::Config(ref msg) if msg.contains("DIAGSYNC_CACHE_PEPPER")));

        clear_env();
    }

    #[test]
    fn invalid_interval_is_rejected() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();
        std::env::set_var("DIAGSYNC_SERVER_URL", "https://api.example.com");
        std::env::set_var("DIAGSYNC_CACHE_PEPPER", "p");
        std::env::set_var("DIAGSYNC_SYNC_INTERVAL", "half an hour");
        std::env::set_var("DIAGSYNC_DELIVERY_ENABLED", "false");

        assert!(matches!(load_from_env(), Err(DiagSyncError::Config(_))));

        clear_env();
    }

    #[test]
    fn loads_json_file() {
        let path = temp_config(
            r#"{
                "server": { "base_url": "https://api.example.com" },
                "cache": { "pepper": "p", "data_dir": "/tmp/diagsync" },
                "delivery": { "enabled": false }
            }"#,
            "json",
        );

        let config = load_from_file(Some(path.clone())).expect("json config");
        assert_eq!(config.cache.data_dir, PathBuf::from("/tmp/diagsync"));
        assert!(!config.delivery.enabled);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn loads_toml_file() {
        let path = temp_config(
            r#"
[server]
base_url = "https://api.example.com"
blocking_timeout_ms = 250

[cache]
pepper = "p"

[delivery]
endpoint = "https://intake.example.com/v1/input"
batch_max = 50
"#,
            "toml",
        );

        let config = load_from_file(Some(path.clone())).expect("toml config");
        assert_eq!(config.server.blocking_timeout_ms, 250);
        assert_eq!(config.delivery.batch_max, 50);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn file_that_fails_validation_is_rejected() {
        let path = temp_config(r#"{ "server": { "base_url": "https://x" } }"#, "json");
        assert!(matches!(load_from_file(Some(path.clone())), Err(DiagSyncError::Config(_))));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/diagsync.json")));
        assert!(matches!(result, Err(DiagSyncError::Config(_))));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let result = parse_config("a: b", Path::new("diagsync.yaml"));
        assert!(result.is_err());
    }
}
