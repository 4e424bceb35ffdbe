//! In-process session: login state, signing credentials and user tracking

use std::sync::Arc;

use diagsync_core::{SessionPort, TelemetryPort};
use diagsync_domain::constants::SESSIONS_PATH;
use diagsync_domain::{LogStatus, QueueItem, SessionState, SessionUser};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::credentials::{CredentialStore, StoredSession};
use super::error::{SessionError, SessionResult};
use crate::http::{ApiRequest, BlockingReply, Credentials, SignedClient};

/// Publishes login state to the cache reconciler and anything else
/// subscribed, and keeps the client's signing identity in step with it.
pub struct LocalSession {
    client: Arc<SignedClient>,
    store: CredentialStore,
    state: watch::Sender<SessionState>,
    telemetry: RwLock<Option<Arc<dyn TelemetryPort>>>,
}

impl std::fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSession")
            .field("logged_in", &self.state.borrow().is_logged_in())
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl LocalSession {
    pub fn new(client: Arc<SignedClient>, store: CredentialStore) -> Self {
        Self {
            client,
            store,
            state: watch::channel(SessionState::LoggedOut).0,
            telemetry: RwLock::new(None),
        }
    }

    /// Route `track` and `report_error` items to `port`.
    pub fn set_telemetry(&self, port: Arc<dyn TelemetryPort>) {
        *self.telemetry.write() = Some(port);
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.store
    }

    /// Install `credentials` for signing, persist them and publish the login.
    #[instrument(skip(self, user, credentials), fields(user = %user.username))]
    pub async fn login(
        &self,
        user: SessionUser,
        credentials: Credentials,
        session_id: Option<i64>,
    ) -> SessionResult<()> {
        self.store.save(&StoredSession::new(user.clone(), &credentials, session_id)).await?;
        self.client.set_credentials(Some(credentials));
        self.state.send_replace(SessionState::LoggedIn { user, session_id });
        info!("logged in");
        self.track("logged_in");
        Ok(())
    }

    /// End the server session and forget the local one. Server failures are
    /// ignored; the local state is always cleared.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> SessionResult<()> {
        let Some(credentials) = self.client.credentials() else {
            return Err(SessionError::NotLoggedIn);
        };
        self.track("logged_out");

        let request = ApiRequest::delete(format!("{SESSIONS_PATH}/{}", credentials.user));
        match self.client.blocking_request(request, None).await {
            Ok(BlockingReply::Completed(_)) => debug!("server session ended"),
            Ok(BlockingReply::NotCompleted) => warn!("logout request did not complete"),
            Err(err) => warn!(error = %err, "logout request failed"),
        }

        self.client.set_credentials(None);
        self.state.send_replace(SessionState::LoggedOut);
        self.store.clear().await?;
        info!("logged out");
        Ok(())
    }

    /// Reinstate the stored session at startup. Returns whether a session was
    /// restored; a tampered store leaves the user logged out.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> SessionResult<bool> {
        let Some(stored) = self.store.load().await? else {
            if self.store.was_tampered() {
                self.client.set_credentials(None);
                self.state.send_replace(SessionState::LoggedOut);
            }
            return Ok(false);
        };
        self.client.set_credentials(Some(stored.credentials()));
        info!(user = %stored.user.username, "session restored");
        self.state.send_replace(SessionState::LoggedIn {
            user: stored.user,
            session_id: stored.session_id,
        });
        Ok(true)
    }

    /// Queue a user action tagged with the session and user.
    pub fn track(&self, event: &str) {
        self.enqueue(QueueItem::action(event), false);
    }

    /// Queue an error report with optional captured log text.
    pub fn report_error(&self, message: impl Into<String>, log_text: Option<String>) {
        let mut item = QueueItem::log(LogStatus::Error, message);
        if let Some(text) = log_text {
            item = item.with_log_text(text);
        }
        self.enqueue(item, false);
    }

    fn enqueue(&self, item: QueueItem, defer: bool) {
        let Some(port) = self.telemetry.read().clone() else {
            return;
        };
        let state = self.state();
        let item = item
            .with_session(state.session_id())
            .with_user(state.user().map(SessionUser::snapshot));
        port.send(item, defer);
    }
}

/// Tags items with the session and user, then hands them to the installed
/// queue. Pass the session to `init_tracing` so forwarded logs carry both.
impl TelemetryPort for LocalSession {
    fn send(&self, item: QueueItem, defer: bool) {
        self.enqueue(item, defer);
    }
}

impl SessionPort for LocalSession {
    fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cache::ProtectedFiles;
    use crate::observability::LogForwardingLayer;

    #[derive(Default)]
    struct Captured(Mutex<Vec<QueueItem>>);

    impl TelemetryPort for Captured {
        fn send(&self, item: QueueItem, _defer: bool) {
            self.0.lock().push(item);
        }
    }

    fn user() -> SessionUser {
        SessionUser {
            id: 8,
            username: "sam@example.com".into(),
            first_name: "Sam".into(),
            last_name: "Ng".into(),
            roles: vec!["subscriber".into()],
            free_diagram_id: None,
        }
    }

    fn session(server: &MockServer, dir: &TempDir) -> LocalSession {
        let client = Arc::new(SignedClient::builder().base_url(server.uri()).build().unwrap());
        let store = CredentialStore::new(dir.path().join("credentials.json"), ProtectedFiles::new("p"));
        LocalSession::new(client, store)
    }

    #[tokio::test]
    async fn login_publishes_and_restore_reinstates() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let first = session(&server, &dir);
        let mut rx = first.subscribe();

        first.login(user(), Credentials::new("tok", "sec"), Some(12)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_logged_in());
        assert_eq!(first.client.credentials().unwrap().user, "tok");

        let second = session(&server, &dir);
        assert!(second.restore().await.unwrap());
        assert_eq!(second.state().session_id(), Some(12));
        assert_eq!(second.client.credentials().unwrap().secret, "sec");
    }

    #[tokio::test]
    async fn logout_ignores_server_failure() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/sessions/tok"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let session = session(&server, &dir);
        session.login(user(), Credentials::new("tok", "sec"), None).await.unwrap();

        session.logout().await.unwrap();
        assert!(!session.state().is_logged_in());
        assert!(session.client.credentials().is_none());
        assert!(!session.restore().await.unwrap());
    }

    #[tokio::test]
    async fn tracked_items_carry_user_and_session() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let session = session(&server, &dir);
        let captured = Arc::new(Captured::default());
        session.set_telemetry(captured.clone());

        session.login(user(), Credentials::new("tok", "sec"), Some(4)).await.unwrap();
        session.report_error("boom", Some("trace".into()));

        let items = captured.0.lock();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].message, "logged_in");
        assert_eq!(items[1].session_id, Some(4));
        assert_eq!(items[1].user.as_ref().unwrap().username, "sam@example.com");
        assert_eq!(items[1].log_text.as_deref(), Some("trace"));
    }

    #[tokio::test]
    async fn forwarded_logs_carry_user_and_session() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let session = Arc::new(session(&server, &dir));
        let captured = Arc::new(Captured::default());
        session.set_telemetry(captured.clone());
        session.login(user(), Credentials::new("tok", "sec"), Some(31)).await.unwrap();

        let layer = LogForwardingLayer::new(session.clone(), tracing::Level::WARN);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(diagram_id = 7, "body fetch failed");
        });

        let items = captured.0.lock();
        let forwarded = items.last().unwrap();
        assert_eq!(forwarded.message, "body fetch failed");
        assert_eq!(forwarded.status, LogStatus::Warning);
        assert_eq!(forwarded.session_id, Some(31));
        assert_eq!(forwarded.user.as_ref().unwrap().id, 8);
        assert_eq!(forwarded.user.as_ref().unwrap().username, "sam@example.com");
    }
}
