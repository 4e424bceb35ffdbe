use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use diagsync_core::SessionPort;
use diagsync_domain::{
    CacheConfig, CacheEvent, DiagramId, DiagramMeta, DiagramOwner, DiagramRecord, SessionState,
    SessionUser,
};
use diagsync_infra::{CacheReconciler, SignedClient};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PEPPER: &str = "integration-pepper";

/// Session whose state is driven by the test.
pub struct StaticSession {
    state: watch::Sender<SessionState>,
}

impl StaticSession {
    pub fn logged_in() -> Arc<Self> {
        let state = SessionState::LoggedIn { user: user(), session_id: Some(1) };
        Arc::new(Self { state: watch::channel(state).0 })
    }

    pub fn logged_out() -> Arc<Self> {
        Arc::new(Self { state: watch::channel(SessionState::LoggedOut).0 })
    }

    pub fn log_out(&self) {
        self.state.send_replace(SessionState::LoggedOut);
    }
}

impl SessionPort for StaticSession {
    fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

pub fn user() -> SessionUser {
    SessionUser {
        id: 1,
        username: "owner@example.com".into(),
        first_name: "Olive".into(),
        last_name: "Owner".into(),
        roles: vec!["subscriber".into()],
        free_diagram_id: None,
    }
}

/// Fixed point in time offset by `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub fn record(id: DiagramId, saved_at: DateTime<Utc>, payload: &[u8]) -> DiagramRecord {
    DiagramRecord::new(
        DiagramMeta {
            id,
            owner: DiagramOwner { id: 1, username: "owner@example.com".into(), free_diagram_id: None },
            access_grants: vec![],
            created_at: at(0),
            updated_at: Some(saved_at),
            name: Some(format!("Diagram {id}")),
            alias: None,
            use_real_names: false,
            require_password_for_real_names: false,
            shown: true,
        },
        payload.to_vec(),
    )
}

pub fn client(server: &MockServer) -> Arc<SignedClient> {
    Arc::new(
        SignedClient::builder()
            .base_url(server.uri())
            .blocking_timeout(Duration::from_secs(2))
            .build()
            .unwrap(),
    )
}

pub fn reconciler(
    server: &MockServer,
    dir: &Path,
    session: Arc<dyn SessionPort>,
) -> CacheReconciler {
    let config = CacheConfig {
        data_dir: dir.to_path_buf(),
        pepper: PEPPER.into(),
        ..CacheConfig::default()
    };
    CacheReconciler::new(client(server), session, &config)
}

/// Serve `GET /diagrams` with `(id, saved_at)` rows.
pub async fn mount_index(server: &MockServer, rows: &[(DiagramId, DateTime<Utc>)]) {
    let body: Vec<_> = rows
        .iter()
        .map(|(id, saved_at)| json!({"id": id, "saved_at": saved_at, "name": "ignored"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/diagrams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Serve `GET /diagrams/{id}`, expecting exactly `times` calls.
pub async fn mount_body(server: &MockServer, record: &DiagramRecord, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/diagrams/{}", record.id())))
        .respond_with(ResponseTemplate::new(200).set_body_json(record))
        .expect(times)
        .mount(server)
        .await;
}

/// Collect events until `UpdateFinished` (inclusive) or panic after 5 s.
pub async fn until_finished(events: &mut broadcast::Receiver<CacheEvent>) -> Vec<CacheEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            let done = event == CacheEvent::UpdateFinished;
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("reconcile cycle did not finish");
    seen
}

/// GET requests the server received for `path`.
pub async fn gets_for(server: &MockServer, target: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == target)
        .count()
}
