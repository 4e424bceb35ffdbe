//! Bookkeeping for requests that have been dispatched but not finished

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Method;
use tokio::sync::watch;
use tracing::debug;

pub type RequestId = u64;

/// One dispatched request
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: RequestId,
    pub method: Method,
    pub url: String,
    pub started: Instant,
}

#[derive(Debug)]
pub struct InFlightRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    count: watch::Sender<usize>,
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            count: watch::channel(0).0,
        }
    }
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, method: Method, url: impl Into<String>) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = PendingRequest { id, method, url: url.into(), started: Instant::now() };
        let len = {
            let mut pending = self.pending.lock();
            pending.insert(id, request);
            pending.len()
        };
        self.count.send_replace(len);
        id
    }

    /// Remove `id`. Returns `false` if it was not registered.
    pub fn complete(&self, id: RequestId) -> bool {
        let (removed, len) = {
            let mut pending = self.pending.lock();
            let removed = pending.remove(&id).is_some();
            (removed, pending.len())
        };
        if removed {
            self.count.send_replace(len);
            if len == 0 {
                debug!("all requests finished");
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// URLs of outstanding requests in dispatch order.
    pub fn pending_urls(&self) -> Vec<String> {
        let mut requests: Vec<PendingRequest> = self.pending.lock().values().cloned().collect();
        requests.sort_by_key(|request| request.id);
        requests.into_iter().map(|request| request.url).collect()
    }

    /// One line per outstanding request: `METHOD url (elapsed)`.
    pub fn summarize(&self) -> String {
        let mut requests: Vec<PendingRequest> = self.pending.lock().values().cloned().collect();
        requests.sort_by_key(|request| request.id);
        let mut out = String::new();
        for request in requests {
            let _ = writeln!(
                out,
                "{} {} ({} ms)",
                request.method,
                request.url,
                request.started.elapsed().as_millis()
            );
        }
        out
    }

    /// Receiver of the outstanding-request count; zero means all finished.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Wait until nothing is in flight. Returns `false` on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let idle = matches!(tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0)).await, Ok(Ok(_)));
        idle
    }
}

/// Completes its request when dropped, so a panicking or aborted task still
/// leaves the registry.
pub(crate) struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    id: RequestId,
}

impl InFlightGuard {
    pub(crate) fn new(registry: Arc<InFlightRegistry>, id: RequestId) -> Self {
        Self { registry, id }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.complete(self.id);
    }
}
