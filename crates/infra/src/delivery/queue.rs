//! Durable, single-flight delivery of telemetry items
//!
//! Items are appended in memory and written to disk on every timer tick,
//! after every accepted batch, and at shutdown. At most one batch is in
//! flight; only the items of an accepted batch are removed, by insert id.
//!
//! Events logged from this module are never forwarded back into the queue.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use diagsync_core::{BatchQueue, DeliverySink, PushOutcome, TelemetryPort};
use diagsync_domain::{Config, DeliveryConfig, QueueItem, RecordContext};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::persistence::QueueFile;
use super::sink::HttpDeliverySink;
use crate::cache::ProtectedFiles;
use crate::http::SignedClient;
use crate::scheduling::{PeriodicTask, SchedulerError};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    sink: Arc<dyn DeliverySink>,
    file: QueueFile,
    context: RecordContext,
    batch_max: usize,
    retry_interval: Duration,
    shutdown_timeout: Duration,
    enabled: AtomicBool,
    /// Set by `shutdown`; no new batch starts while set.
    stopping: AtomicBool,
    queue: Mutex<BatchQueue>,
    /// Mirrors `queue.is_in_flight()`; only updated while `queue` is locked.
    delivering: watch::Sender<bool>,
    sent: AtomicU64,
    persist_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<PeriodicTask>>,
}

/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("path", &self.inner.file.path())
            .field("queued", &self.queued_len())
            .field("delivering", &self.is_delivering())
            .finish_non_exhaustive()
    }
}

impl DeliveryQueue {
    pub fn new(
        sink: Arc<dyn DeliverySink>,
        file: QueueFile,
        context: RecordContext,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                file,
                context,
                batch_max: config.batch_max.max(1),
                retry_interval: config.retry_interval(),
                shutdown_timeout: config.shutdown_timeout(),
                enabled: AtomicBool::new(config.enabled),
                stopping: AtomicBool::new(false),
                queue: Mutex::new(BatchQueue::new()),
                delivering: watch::channel(false).0,
                sent: AtomicU64::new(0),
                persist_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Queue posting to the configured HTTP endpoint. A relative queue path
    /// is resolved against the cache directory; the file shares the cache
    /// pepper.
    pub fn from_config(client: Arc<SignedClient>, config: &Config) -> Self {
        let path: PathBuf = if config.delivery.queue_path.is_absolute() {
            config.delivery.queue_path.clone()
        } else {
            config.cache.data_dir.join(&config.delivery.queue_path)
        };
        let context = RecordContext {
            service: config.delivery.service.clone(),
            source: config.delivery.source.clone(),
            version: config.server.client_version.clone(),
            hostname: config.delivery.hostname.clone(),
        };
        let sink = Arc::new(HttpDeliverySink::from_config(client, &config.delivery));
        let file = QueueFile::new(path, ProtectedFiles::new(config.cache.pepper.clone()));
        Self::new(sink, file, context, &config.delivery)
    }

    /* ---------------------------------------------------------------------- */
    /* Lifecycle */
    /* ---------------------------------------------------------------------- */

    /// Reload the persisted queue. Items queued before this call stay behind
    /// the reloaded ones. Returns the queue length.
    #[instrument(skip(self))]
    pub async fn init(&self) -> usize {
        let loaded = self.inner.file.load().await;
        let restored = loaded.len();
        let len = {
            let mut queue = self.inner.queue.lock();
            if queue.is_in_flight() {
                warn!("delivery already in flight; skipping reload");
                return queue.len();
            }
            let pending = queue.snapshot();
            let mut merged = BatchQueue::from_items(loaded);
            for item in pending {
                merged.push(item);
            }
            *queue = merged;
            queue.len()
        };
        info!(restored, queued = len, "delivery queue loaded");
        len
    }

    /// Start the retry timer. Each tick persists the queue and attempts a
    /// delivery.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut slot = self.inner.timer.lock();
        if slot.as_ref().is_some_and(PeriodicTask::is_running) {
            return Err(SchedulerError::AlreadyRunning("delivery queue"));
        }
        self.inner.stopping.store(false, Ordering::SeqCst);
        let this = self.clone();
        *slot = Some(PeriodicTask::spawn("delivery queue", self.inner.retry_interval, move || {
            let this = this.clone();
            async move {
                this.persist().await;
                this.tick();
            }
        }));
        info!(retry_ms = self.inner.retry_interval.as_millis() as u64, "delivery queue started");
        Ok(())
    }

    /// Stop the timer, wait (bounded) for an in-flight batch, then write the
    /// queue one last time. No further batch starts until `start` is called
    /// again.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        let timer = self.inner.timer.lock().take();
        if let Some(mut timer) = timer {
            if let Err(err) = timer.stop(STOP_TIMEOUT).await {
                warn!(error = %err, "delivery timer did not stop cleanly");
            }
        }

        let mut delivering = self.inner.delivering.subscribe();
        let idle = tokio::time::timeout(self.inner.shutdown_timeout, delivering.wait_for(|busy| !busy))
            .await
            .is_ok_and(|changed| changed.is_ok());
        if !idle {
            warn!(
                timeout_ms = self.inner.shutdown_timeout.as_millis() as u64,
                "in-flight delivery did not finish before shutdown"
            );
        }

        self.persist().await;
        info!(queued = self.queued_len(), sent = self.sent_count(), "delivery queue shut down");
    }

    /* ---------------------------------------------------------------------- */
    /* Queueing and delivery */
    /* ---------------------------------------------------------------------- */

    /// Append `item`, replacing the latest queued item with the same replace
    /// key. Delivers right away unless `defer` is set. Disabled queues drop
    /// the item.
    pub fn send(&self, item: QueueItem, defer: bool) {
        if !self.is_enabled() {
            return;
        }
        let outcome = self.inner.queue.lock().push(item);
        if outcome == PushOutcome::Replaced {
            debug!("replaced queued item");
        }
        if !defer {
            self.tick();
        }
    }

    /// Issue one delivery if none is outstanding. Returns whether a batch was
    /// sent.
    pub fn tick(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self.inner.stopping.load(Ordering::SeqCst) {
            debug!("shutting down; delivery deferred");
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("no async runtime; delivery deferred");
            return false;
        };

        let chunk = {
            let mut queue = self.inner.queue.lock();
            let chunk = queue.take_chunk(self.inner.batch_max);
            if chunk.is_some() {
                self.inner.delivering.send_replace(true);
            }
            chunk
        };
        let Some(chunk) = chunk else {
            return false;
        };

        let records: Vec<serde_json::Value> =
            chunk.iter().map(|item| item.to_record(&self.inner.context)).collect();
        let count = chunk.len();
        debug!(count, "delivering batch");

        let this = self.clone();
        runtime.spawn(async move {
            let result = this.inner.sink.deliver(records).await;
            this.complete(count, result).await;
        });
        true
    }

    async fn complete(&self, count: usize, result: diagsync_domain::Result<()>) {
        match result {
            Ok(()) => {
                let removed = {
                    let mut queue = self.inner.queue.lock();
                    let removed = queue.acknowledge();
                    self.inner.delivering.send_replace(false);
                    removed
                };
                self.inner.sent.fetch_add(removed as u64, Ordering::Relaxed);
                debug!(sent = count, removed, "batch accepted");
                self.persist().await;
                self.tick();
            }
            Err(err) => {
                {
                    let mut queue = self.inner.queue.lock();
                    queue.release();
                    self.inner.delivering.send_replace(false);
                }
                warn!(count, error = %err, "batch delivery failed; will retry");
            }
        }
    }

    async fn persist(&self) {
        let _guard = self.inner.persist_lock.lock().await;
        let items = self.inner.queue.lock().snapshot();
        if let Err(err) = self.inner.file.save(&items).await {
            warn!(error = %err, "failed to persist delivery queue");
        }
    }

    /* ---------------------------------------------------------------------- */
    /* Counters */
    /* ---------------------------------------------------------------------- */

    pub fn queued_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Items removed after an accepted delivery since construction.
    pub fn sent_count(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    pub fn is_delivering(&self) -> bool {
        self.inner.queue.lock().is_in_flight()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "delivery toggled");
    }

    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.inner.queue.lock().snapshot()
    }
}

impl TelemetryPort for DeliveryQueue {
    fn send(&self, item: QueueItem, defer: bool) {
        DeliveryQueue::send(self, item, defer);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use diagsync_domain::{DiagSyncError, LogStatus};
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;

    /// Records every batch; fails while `fail` is set.
    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<Value>>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn deliver(&self, records: Vec<Value>) -> diagsync_domain::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DiagSyncError::Network("offline".into()));
            }
            self.batches.lock().push(records);
            Ok(())
        }
    }

    fn context() -> RecordContext {
        RecordContext {
            service: "diagsync".into(),
            source: "desktop".into(),
            version: "test".into(),
            hostname: None,
        }
    }

    fn queue(dir: &TempDir, sink: Arc<RecordingSink>, batch_max: usize) -> DeliveryQueue {
        let config = DeliveryConfig { batch_max, ..DeliveryConfig::default() };
        let file = QueueFile::new(dir.path().join("queue.json"), ProtectedFiles::new("pepper"));
        DeliveryQueue::new(sink, file, context(), &config)
    }

    async fn drained(queue: &DeliveryQueue) {
        let mut rx = queue.inner.delivering.subscribe();
        for _ in 0..50 {
            if !queue.is_delivering() && queue.queued_len() == 0 {
                return;
            }
            let _ = tokio::time::timeout(Duration::from_millis(20), rx.changed()).await;
        }
    }

    #[tokio::test]
    async fn drains_in_bounded_batches() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let queue = queue(&dir, sink.clone(), 2);

        for i in 0..5 {
            queue.send(QueueItem::log(LogStatus::Info, format!("line {i}")), true);
        }
        assert!(queue.tick());
        drained(&queue).await;

        let batches = sink.batches.lock();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let messages: Vec<&str> =
            batches.iter().flatten().map(|r| r["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
        assert_eq!(queue.sent_count(), 5);
    }

    #[tokio::test]
    async fn failed_delivery_keeps_items() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let queue = queue(&dir, sink.clone(), 10);

        queue.send(QueueItem::action("opened"), false);
        tokio::time::timeout(Duration::from_secs(1), async {
            while queue.is_delivering() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(queue.queued_len(), 1);
        assert_eq!(queue.sent_count(), 0);
    }

    #[tokio::test]
    async fn disabled_queue_drops_items() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir, Arc::new(RecordingSink::default()), 10);
        queue.set_enabled(false);
        queue.send(QueueItem::action("ignored"), true);
        assert_eq!(queue.queued_len(), 0);
    }

    /// Holds each batch until a permit is added.
    struct GatedSink {
        gate: tokio::sync::Semaphore,
        batches: Mutex<Vec<Vec<Value>>>,
    }

    #[async_trait]
    impl DeliverySink for GatedSink {
        async fn deliver(&self, records: Vec<Value>) -> diagsync_domain::Result<()> {
            let permit = self.gate.acquire().await.map_err(|e| DiagSyncError::Internal(e.to_string()))?;
            permit.forget();
            self.batches.lock().push(records);
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_does_not_chain_another_batch() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(GatedSink {
            gate: tokio::sync::Semaphore::new(0),
            batches: Mutex::new(Vec::new()),
        });
        let config = DeliveryConfig { batch_max: 1, ..DeliveryConfig::default() };
        let path = dir.path().join("queue.json");
        let queue = DeliveryQueue::new(
            sink.clone(),
            QueueFile::new(&path, ProtectedFiles::new("pepper")),
            context(),
            &config,
        );
        queue.send(QueueItem::log(LogStatus::Info, "first"), true);
        queue.send(QueueItem::log(LogStatus::Info, "second"), true);
        assert!(queue.tick());

        let stopping = tokio::spawn({
            let queue = queue.clone();
            async move { queue.shutdown().await }
        });
        while !queue.inner.stopping.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        sink.gate.add_permits(10);
        stopping.await.unwrap();

        assert_eq!(sink.batches.lock().len(), 1);
        assert!(!queue.is_delivering());
        assert!(!queue.tick());
        let saved = QueueFile::new(&path, ProtectedFiles::new("pepper")).load().await;
        let messages: Vec<String> = saved.into_iter().map(|item| item.message).collect();
        assert_eq!(messages, vec!["second"]);
    }

    #[tokio::test]
    async fn shutdown_persists_and_init_restores() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let first = queue(&dir, sink.clone(), 10);
        first.send(QueueItem::log(LogStatus::Warning, "a"), true);
        first.send(QueueItem::log(LogStatus::Error, "b"), true);
        first.shutdown().await;

        let second = queue(&dir, sink, 10);
        second.send(QueueItem::log(LogStatus::Info, "c"), true);
        assert_eq!(second.init().await, 3);
        let messages: Vec<String> = second.snapshot().into_iter().map(|i| i.message).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
    }
}
