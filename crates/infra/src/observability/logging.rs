//! Tracing subscriber setup

use std::sync::Arc;

use diagsync_core::TelemetryPort;
use diagsync_domain::{DiagSyncError, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use super::forwarding::LogForwardingLayer;

/// Install the global subscriber: `EnvFilter` (from `RUST_LOG`, else the
/// configured level), a plain or JSON `fmt` layer, and optionally a layer
/// forwarding warnings and errors to `telemetry`. Passing the
/// `LocalSession` tags forwarded items with the session id and user.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(
    config: &LoggingConfig,
    telemetry: Option<Arc<dyn TelemetryPort>>,
) -> Result<(), DiagSyncError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| DiagSyncError::Config(format!("invalid log level {:?}: {e}", config.level)))?;

    let fmt_layer = if config.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let forwarding = match telemetry {
        Some(port) => Some(LogForwardingLayer::from_config(port, config)?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(forwarding)
        .try_init()
        .map_err(|e| DiagSyncError::Internal(format!("failed to init tracing subscriber: {e}")))?;

    tracing::info!(level = %config.level, json = config.json, "tracing initialized");
    Ok(())
}
