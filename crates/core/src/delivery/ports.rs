//! Port interfaces for telemetry delivery

use async_trait::async_trait;
use diagsync_domain::{QueueItem, Result};
use serde_json::Value;

/// Remote endpoint accepting one batch of flattened records per call.
///
/// `Ok(())` means the whole batch was accepted; any error leaves every
/// item queued.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, records: Vec<Value>) -> Result<()>;
}

/// Anything that accepts telemetry items for later delivery
pub trait TelemetryPort: Send + Sync {
    /// Queue an item. With `defer` set, delivery waits for the next timer tick.
    fn send(&self, item: QueueItem, defer: bool);
}
