//! Forward warnings and errors into the delivery queue

use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;

use diagsync_core::TelemetryPort;
use diagsync_domain::{DiagSyncError, LogStatus, LoggingConfig, QueueItem};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Events from this target are never forwarded; they describe delivery itself.
const DELIVERY_TARGET: &str = "diagsync_infra::delivery";

/// `tracing` layer that turns events at or above `threshold` into deferred
/// log items.
pub struct LogForwardingLayer {
    port: Arc<dyn TelemetryPort>,
    threshold: Level,
}

impl LogForwardingLayer {
    pub fn new(port: Arc<dyn TelemetryPort>, threshold: Level) -> Self {
        Self { port, threshold }
    }

    pub fn from_config(port: Arc<dyn TelemetryPort>, config: &LoggingConfig) -> Result<Self, DiagSyncError> {
        let threshold = Level::from_str(&config.forward_level).map_err(|_| {
            DiagSyncError::Config(format!("invalid forward level {:?}", config.forward_level))
        })?;
        Ok(Self::new(port, threshold))
    }

    fn status_for(level: &Level) -> LogStatus {
        match *level {
            Level::ERROR => LogStatus::Error,
            Level::WARN => LogStatus::Warning,
            Level::INFO => LogStatus::Info,
            _ => LogStatus::Debug,
        }
    }
}

impl<S: Subscriber> Layer<S> for LogForwardingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // Level orders by verbosity: ERROR < WARN < ... < TRACE
        if *meta.level() > self.threshold || meta.target().starts_with(DELIVERY_TARGET) {
            return;
        }

        let mut visitor = EventText::default();
        event.record(&mut visitor);

        let mut item = QueueItem::log(Self::status_for(meta.level()), visitor.message);
        if !visitor.fields.is_empty() {
            item = item.with_log_text(format!("{}: {}", meta.target(), visitor.fields));
        }
        self.port.send(item, true);
    }
}

#[derive(Default)]
struct EventText {
    message: String,
    fields: String,
}

impl Visit for EventText {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push(field, format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push(field, format_args!("{value:?}"));
        }
    }
}

impl EventText {
    fn push(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", field.name(), value);
    }
}
