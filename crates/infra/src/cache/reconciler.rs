//! Offline-first reconciliation of the local diagram mirror
//!
//! A cycle fetches the server index, evicts ids the server no longer lists,
//! and fetches bodies only for ids that are missing or strictly newer on the
//! server. Bodies arrive in any order; [`CacheEvent::UpdateFinished`] fires
//! once after the last of them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use diagsync_core::{plan_reconciliation, should_replace, Completion, CompletionTracker, CycleRequest, SessionPort};
use diagsync_domain::constants::DIAGRAMS_PATH;
use diagsync_domain::{
    impl_domain_status_conversions, CacheConfig, CacheEvent, CacheIndexEntry, ChangedField,
    DiagSyncError, DiagramId, DiagramMeta, DiagramRecord, IndexEntry, SessionUser,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use super::protected::StoreResult;
use super::store::DiagramStore;
use crate::http::{ApiRequest, BlockingReply, HttpError, HttpResponse, SignedClient};
use crate::scheduling::{PeriodicTask, SchedulerError};

const EVENT_CAPACITY: usize = 256;
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Phase of the current reconcile cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileState {
    Idle,
    FetchingIndex,
    Reconciling,
    FetchingBodies,
}

impl_domain_status_conversions!(ReconcileState {
    Idle => "idle",
    FetchingIndex => "fetching_index",
    Reconciling => "reconciling",
    FetchingBodies => "fetching_bodies",
});

#[derive(Debug, Default)]
struct Mirror {
    records: HashMap<DiagramId, DiagramRecord>,
    tracker: CompletionTracker<CycleRequest>,
    cycle: u64,
}

struct Inner {
    client: Arc<SignedClient>,
    session: Arc<dyn SessionPort>,
    store: DiagramStore,
    mirror: Mutex<Mirror>,
    phase: watch::Sender<ReconcileState>,
    events: broadcast::Sender<CacheEvent>,
    sync_interval: Duration,
    timer: Mutex<Option<PeriodicTask>>,
}

/// Owner of the local diagram mirror. Cheap to clone.
#[derive(Clone)]
pub struct CacheReconciler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReconciler")
            .field("root", &self.inner.store.root())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CacheReconciler {
    pub fn new(client: Arc<SignedClient>, session: Arc<dyn SessionPort>, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                session,
                store: DiagramStore::new(&config.data_dir, &config.pepper),
                mirror: Mutex::new(Mirror::default()),
                phase: watch::channel(ReconcileState::Idle).0,
                events: broadcast::channel(EVENT_CAPACITY).0,
                sync_interval: config.sync_interval(),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ReconcileState {
        *self.inner.phase.borrow()
    }

    pub fn is_updating(&self) -> bool {
        self.state() != ReconcileState::Idle
    }

    /// Wait for the current cycle to end. Returns `false` on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.phase.subscribe();
        let idle = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|phase| *phase == ReconcileState::Idle)).await,
            Ok(Ok(_))
        );
        idle
    }

    pub fn store(&self) -> &DiagramStore {
        &self.inner.store
    }

    /* ---------------------------------------------------------------------- */
    /* Startup / shutdown */
    /* ---------------------------------------------------------------------- */

    /// Populate the mirror from disk. Returns the number of records loaded.
    #[instrument(skip(self))]
    pub async fn load(&self) -> StoreResult<usize> {
        let loaded = self.inner.store.load().await?;
        let count = loaded.records.len();
        let ids: Vec<DiagramId> = {
            let mut mirror = self.inner.mirror.lock();
            mirror.records = loaded.records.into_iter().map(|r| (r.id(), r)).collect();
            mirror.records.keys().copied().collect()
        };
        if loaded.index_reset {
            self.emit(CacheEvent::Cleared);
        }
        if !loaded.dropped.is_empty() {
            self.persist_index().await;
        }
        for id in ids {
            self.emit(CacheEvent::Added(id));
        }
        Ok(count)
    }

    /// Start the periodic reconcile timer and the session watcher.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut slot = self.inner.timer.lock();
        if slot.as_ref().is_some_and(PeriodicTask::is_running) {
            return Err(SchedulerError::AlreadyRunning("cache reconciler"));
        }

        let this = self.clone();
        let mut timer = PeriodicTask::spawn("cache reconciler", self.inner.sync_interval, move || {
            let this = this.clone();
            async move {
                this.update();
            }
        });

        let token = timer.token();
        let this = self.clone();
        let mut session = self.inner.session.subscribe();
        timer.attach(tokio::spawn(async move {
            let logged_in = session.borrow_and_update().is_logged_in();
            if logged_in {
                this.update();
            }
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let logged_in = session.borrow_and_update().is_logged_in();
                        if logged_in {
                            this.update();
                        } else {
                            this.clear().await;
                        }
                    }
                }
            }
        }));

        *slot = Some(timer);
        info!(interval_secs = self.inner.sync_interval.as_secs(), "cache reconciler started");
        Ok(())
    }

    /// Stop the timers and write the index for crash recovery.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let timer = self.inner.timer.lock().take();
        let Some(mut timer) = timer else {
            return Err(SchedulerError::NotRunning("cache reconciler"));
        };
        let stopped = timer.stop(STOP_TIMEOUT).await;
        self.persist_index().await;
        info!("cache reconciler stopped");
        stopped
    }

    /* ---------------------------------------------------------------------- */
    /* Reconcile cycle */
    /* ---------------------------------------------------------------------- */

    /// Start a reconcile cycle. Returns `false` when logged out (the mirror is
    /// cleared instead) or when a cycle is already running.
    pub fn update(&self) -> bool {
        if !self.inner.session.state().is_logged_in() {
            let this = self.clone();
            tokio::spawn(async move { this.clear().await });
            return false;
        }

        let started = self.inner.phase.send_if_modified(|phase| {
            if *phase == ReconcileState::Idle {
                *phase = ReconcileState::FetchingIndex;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("reconcile already running; coalesced");
            return false;
        }

        let cycle = {
            let mut mirror = self.inner.mirror.lock();
            mirror.cycle += 1;
            mirror.tracker.reset();
            mirror.tracker.begin(CycleRequest::Index);
            mirror.cycle
        };
        debug!(cycle, "reconcile started");

        let reply = self.inner.client.non_blocking_request(ApiRequest::get(DIAGRAMS_PATH));
        let this = self.clone();
        tokio::spawn(async move {
            let reply = reply.await;
            this.handle_index(cycle, reply).await;
        });
        true
    }

    async fn handle_index(&self, cycle: u64, reply: Result<HttpResponse, HttpError>) {
        let index: Vec<IndexEntry> = match reply.and_then(|response| response.json()) {
            Ok(index) => index,
            Err(_) if !self.is_current(cycle) => return,
            Err(err) => {
                warn!(error = %err, "diagram index fetch failed; clearing mirror");
                self.clear().await;
                return;
            }
        };
        if !self.is_current(cycle) {
            return;
        }
        self.inner.phase.send_replace(ReconcileState::Reconciling);

        let plan = {
            let mirror = self.inner.mirror.lock();
            let cached = mirror.records.iter().map(|(id, r)| (*id, r.saved_at())).collect();
            plan_reconciliation(&cached, &index)
        };
        debug!(evict = plan.evict.len(), fetch = plan.fetch.len(), "reconcile plan");

        for id in &plan.evict {
            self.remove_local(*id).await;
        }
        if !plan.evict.is_empty() {
            self.persist_index().await;
        }

        {
            let mut mirror = self.inner.mirror.lock();
            if mirror.cycle != cycle {
                return;
            }
            for id in &plan.fetch {
                mirror.tracker.begin(CycleRequest::Body(*id));
            }
        }
        if !plan.fetch.is_empty() {
            self.inner.phase.send_replace(ReconcileState::FetchingBodies);
        }

        for id in plan.fetch {
            let reply = self
                .inner
                .client
                .non_blocking_request(ApiRequest::get(format!("{DIAGRAMS_PATH}/{id}")));
            let this = self.clone();
            tokio::spawn(async move {
                let reply = reply.await;
                this.handle_body(cycle, id, reply).await;
            });
        }

        self.finish(cycle, CycleRequest::Index);
    }

    async fn handle_body(&self, cycle: u64, id: DiagramId, reply: Result<HttpResponse, HttpError>) {
        match reply.and_then(|response| response.json::<DiagramRecord>()) {
            Ok(record) if record.id() == id => {
                self.merge(record, Some(cycle)).await;
            }
            Ok(record) => {
                warn!(diagram_id = id, got = record.id(), "server returned a different diagram");
            }
            Err(err) => {
                warn!(diagram_id = id, error = %err, "diagram fetch failed; keeping cached copy");
            }
        }
        self.finish(cycle, CycleRequest::Body(id));
    }

    fn finish(&self, cycle: u64, request: CycleRequest) {
        let completion = {
            let mut mirror = self.inner.mirror.lock();
            if mirror.cycle != cycle {
                return;
            }
            mirror.tracker.finish(&request)
        };
        match completion {
            Completion::AllFinished => {
                self.inner.phase.send_replace(ReconcileState::Idle);
                info!(cycle, diagrams = self.len(), "reconcile finished");
                self.emit(CacheEvent::UpdateFinished);
            }
            Completion::Pending(remaining) => debug!(cycle, remaining, "reconcile request finished"),
            Completion::Unknown => debug!(cycle, ?request, "ignored duplicate completion"),
        }
    }

    fn is_current(&self, cycle: u64) -> bool {
        self.inner.mirror.lock().cycle == cycle
    }

    /* ---------------------------------------------------------------------- */
    /* Mutations */
    /* ---------------------------------------------------------------------- */

    /// Insert or replace a record if it is newer than the cached copy.
    /// Returns whether anything changed.
    pub async fn add_or_update(&self, record: DiagramRecord) -> bool {
        self.merge(record, None).await
    }

    async fn merge(&self, record: DiagramRecord, cycle: Option<u64>) -> bool {
        let id = record.id();
        let event = {
            let mut mirror = self.inner.mirror.lock();
            if cycle.is_some_and(|cycle| cycle != mirror.cycle) {
                return false;
            }
            let existing = mirror.records.get(&id);
            if !should_replace(existing.map(DiagramRecord::saved_at), record.saved_at()) {
                debug!(diagram_id = id, "cached copy is current; skipping");
                return false;
            }
            let event = match existing {
                Some(old) => CacheEvent::Changed { id, fields: ChangedField::diff(old, &record) },
                None => CacheEvent::Added(id),
            };
            mirror.records.insert(id, record);
            event
        };

        self.persist_payload(id).await;
        self.persist_index().await;
        self.emit(event);
        true
    }

    async fn remove_local(&self, id: DiagramId) -> bool {
        let removed = self.inner.mirror.lock().records.remove(&id).is_some();
        if removed {
            self.persist_payload(id).await;
            self.emit(CacheEvent::Removed(id));
        }
        removed
    }

    /// Drop every record, on disk and in memory. Aborts a running cycle.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        let had_records = {
            let mut mirror = self.inner.mirror.lock();
            mirror.cycle += 1;
            mirror.tracker.reset();
            let had = !mirror.records.is_empty();
            mirror.records.clear();
            had
        };
        let was_running = self.inner.phase.send_replace(ReconcileState::Idle) != ReconcileState::Idle;

        if let Err(err) = self.inner.store.clear().await {
            error!(error = %err, "failed to clear diagram mirror on disk");
        }
        if had_records {
            info!("diagram mirror cleared");
        }
        self.emit(CacheEvent::Cleared);
        if was_running {
            self.emit(CacheEvent::UpdateFinished);
        }
    }

    async fn persist_payload(&self, id: DiagramId) {
        let inner = &self.inner;
        let result = inner
            .store
            .sync_payload(id, || inner.mirror.lock().records.get(&id).map(|r| r.payload.clone()))
            .await;
        if let Err(err) = result {
            error!(diagram_id = id, error = %err, "failed to write diagram to disk");
        }
    }

    async fn persist_index(&self) {
        let inner = &self.inner;
        let result = inner
            .store
            .sync_index(|| {
                let mirror = inner.mirror.lock();
                let mut metas: Vec<DiagramMeta> =
                    mirror.records.values().map(|r| r.meta.clone()).collect();
                metas.sort_by_key(|meta| meta.id);
                metas
            })
            .await;
        if let Err(err) = result {
            error!(error = %err, "failed to write cache index");
        }
    }

    fn emit(&self, event: CacheEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /* ---------------------------------------------------------------------- */
    /* Server writes */
    /* ---------------------------------------------------------------------- */

    /// Pull one diagram now and merge it. Offline, timeout, 204 and empty
    /// bodies are ignored.
    #[instrument(skip(self))]
    pub async fn sync_diagram_from_server(&self, id: DiagramId) -> Option<DiagramRecord> {
        let request = ApiRequest::get(format!("{DIAGRAMS_PATH}/{id}")).accept(&[200, 204]);
        let response = match self.inner.client.blocking_request(request, None).await {
            Ok(BlockingReply::Completed(response)) => response,
            Ok(BlockingReply::NotCompleted) => {
                debug!(diagram_id = id, "sync from server timed out");
                return None;
            }
            Err(err) => {
                error!(diagram_id = id, status = ?err.status_code(), url = ?err.url(), "failed to sync diagram from server");
                return None;
            }
        };
        if response.status == 204 || response.is_empty() {
            info!(diagram_id = id, "no content from server");
            return None;
        }
        match response.json::<DiagramRecord>() {
            Ok(record) => {
                self.add_or_update(record.clone()).await;
                Some(record)
            }
            Err(err) => {
                warn!(diagram_id = id, error = %err, "undecodable diagram from server");
                None
            }
        }
    }

    /// Upload a new payload, then update the local copy.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn push_diagram(&self, id: DiagramId, payload: Vec<u8>) -> Result<DiagramRecord, DiagSyncError> {
        let mut record = self
            .find_diagram(id)
            .ok_or_else(|| DiagSyncError::NotFound(format!("diagram {id} is not cached")))?;
        let updated_at = Utc::now();
        record.meta.updated_at = Some(updated_at);
        record.payload = payload;

        let body = json!({
            "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &record.payload),
            "updated_at": updated_at,
        });
        let request = ApiRequest::put(format!("{DIAGRAMS_PATH}/{id}")).json(&body)?;
        match self.inner.client.blocking_request(request, None).await? {
            BlockingReply::Completed(_) => {
                info!(diagram_id = id, bytes = record.payload.len(), %updated_at, "pushed diagram to server");
                self.add_or_update(record.clone()).await;
                Ok(record)
            }
            BlockingReply::NotCompleted => {
                Err(DiagSyncError::Network(format!("push of diagram {id} did not complete")))
            }
        }
    }

    /// Delete on the server, then locally.
    #[instrument(skip(self))]
    pub async fn delete_diagram(&self, id: DiagramId) -> Result<(), DiagSyncError> {
        let request = ApiRequest::delete(format!("{DIAGRAMS_PATH}/{id}"));
        match self.inner.client.blocking_request(request, None).await? {
            BlockingReply::Completed(_) => {
                if self.remove_local(id).await {
                    self.persist_index().await;
                }
                Ok(())
            }
            BlockingReply::NotCompleted => {
                Err(DiagSyncError::Network(format!("delete of diagram {id} did not complete")))
            }
        }
    }

    /// Change the visibility flag on the server, then locally.
    #[instrument(skip(self))]
    pub async fn set_shown(&self, id: DiagramId, shown: bool) -> Result<(), DiagSyncError> {
        let request = ApiRequest::patch(format!("{DIAGRAMS_PATH}/{id}"))
            .query("shown", shown.to_string())
            .json(&json!({}))?;
        self.inner.client.non_blocking_request(request).await?;

        let changed = {
            let mut mirror = self.inner.mirror.lock();
            match mirror.records.get_mut(&id) {
                Some(record) if record.meta.shown != shown => {
                    record.meta.shown = shown;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.persist_index().await;
            self.emit(CacheEvent::Changed { id, fields: vec![ChangedField::Visibility] });
        }
        Ok(())
    }

    /* ---------------------------------------------------------------------- */
    /* Lookups */
    /* ---------------------------------------------------------------------- */

    pub fn find_diagram(&self, id: DiagramId) -> Option<DiagramRecord> {
        self.inner.mirror.lock().records.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.mirror.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<DiagramId> {
        let mut ids: Vec<DiagramId> = self.inner.mirror.lock().records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// File list rows, sorted by display name then id.
    pub fn entries(&self) -> Vec<CacheIndexEntry> {
        let mut entries: Vec<CacheIndexEntry> = self
            .inner
            .mirror
            .lock()
            .records
            .values()
            .map(|r| CacheIndexEntry::from_meta(&r.meta, self.local_path_for_id(r.id())))
            .collect();
        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        entries
    }

    pub fn local_path_for_id(&self, id: DiagramId) -> PathBuf {
        self.inner.store.diagram_dir(id)
    }

    pub fn diagram_for_path(&self, path: &Path) -> Option<DiagramRecord> {
        let name = path.file_name()?.to_str()?;
        let id = DiagramStore::id_for_dir_name(name)?;
        if path != self.local_path_for_id(id) {
            return None;
        }
        self.find_diagram(id)
    }

    pub fn find_free_diagram(&self, user: &SessionUser) -> Option<DiagramRecord> {
        let mirror = self.inner.mirror.lock();
        if let Some(record) = user.free_diagram_id.and_then(|id| mirror.records.get(&id)) {
            return Some(record.clone());
        }
        mirror
            .records
            .values()
            .find(|r| r.meta.owner.id == user.id && r.meta.is_free_diagram())
            .cloned()
    }
}
