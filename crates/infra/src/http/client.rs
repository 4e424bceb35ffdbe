use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use diagsync_domain::constants::{
    AUTHENTICATION_HEADER, CLIENT_VERSION_HEADER, CONTENT_HASH_HEADER, DEFAULT_BLOCKING_TIMEOUT_MS,
};
use diagsync_domain::{DiagSyncError, ServerConfig};
use parking_lot::RwLock;
use reqwest::header::{CONTENT_TYPE, DATE};
use reqwest::Client as ReqwestClient;
use tokio::sync::oneshot;
use tracing::{debug, instrument};
use url::Url;

use super::error::HttpError;
use super::in_flight::{InFlightGuard, InFlightRegistry, RequestId};
use super::reply::{check_reply, BlockingReply, HttpResponse, PendingReply};
use super::request::{ApiRequest, Target};
use super::signing::{
    auth_header, canonical_string, content_hash, http_date, sign, signed_resource, Credentials,
};
use crate::errors::InfraError;

/// Signs and dispatches API requests.
///
/// Construct one per process and share it behind an `Arc`. Every request runs
/// on its own tokio task and is tracked until its reply has been handed off.
#[derive(Debug)]
pub struct SignedClient {
    http: ReqwestClient,
    base_url: String,
    client_version: String,
    anonymous: Credentials,
    credentials: RwLock<Option<Credentials>>,
    in_flight: Arc<InFlightRegistry>,
    blocking_timeout: Duration,
}

impl SignedClient {
    /// Start building a new client.
    pub fn builder() -> SignedClientBuilder {
        SignedClientBuilder::default()
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, DiagSyncError> {
        Self::builder()
            .base_url(&config.base_url)
            .client_version(&config.client_version)
            .timeout(config.request_timeout())
            .blocking_timeout(config.blocking_timeout())
            .anonymous(Credentials::new(&config.anonymous_user, &config.anonymous_secret))
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Swap the identity used for signed (non-anonymous) requests.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.write() = credentials;
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.in_flight
    }

    pub fn pending_urls(&self) -> Vec<String> {
        self.in_flight.pending_urls()
    }

    pub fn summarize_pending(&self) -> String {
        self.in_flight.summarize()
    }

    /// Wait for the in-flight set to empty. Returns `false` on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.in_flight.wait_until_idle(timeout).await
    }

    /// Build the outgoing request, signing it when it targets the API.
    pub fn prepare(&self, request: &ApiRequest) -> Result<reqwest::Request, HttpError> {
        let raw = match &request.target {
            Target::Api(_) => {
                let path = request.path_and_query();
                if path.starts_with('/') {
                    format!("{}{}", self.base_url, path)
                } else {
                    format!("{}/{}", self.base_url, path)
                }
            }
            Target::External(_) => request.path_and_query(),
        };
        let url = Url::parse(&raw)
            .map_err(|e| HttpError::InvalidRequest(format!("invalid URL {raw}: {e}")))?;

        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .header(CONTENT_TYPE, request.content_type.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if matches!(request.target, Target::Api(_)) {
            let hash = content_hash(&request.body);
            let date = http_date(Utc::now());
            let canonical = canonical_string(
                request.method.as_str(),
                &hash,
                &request.content_type,
                &date,
                &signed_resource(&url),
            );
            let credentials = if request.anonymous {
                self.anonymous.clone()
            } else {
                self.credentials().unwrap_or_else(|| self.anonymous.clone())
            };
            let signature = sign(&credentials.secret, &canonical)?;
            builder = builder
                .header(CONTENT_HASH_HEADER, hash)
                .header(DATE, date)
                .header(CLIENT_VERSION_HEADER, self.client_version.as_str())
                .header(AUTHENTICATION_HEADER, auth_header(&credentials.user, &signature));
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        builder.build().map_err(|e| HttpError::InvalidRequest(e.to_string()))
    }

    /// Dispatch and return a future of the checked reply.
    pub fn non_blocking_request(&self, request: ApiRequest) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let (id, url) = self.dispatch(request, move |reply| {
            // receiver gone means the caller stopped waiting
            let _ = tx.send(reply);
        });
        PendingReply::new(id, url, rx)
    }

    /// Dispatch and run `on_reply` once with the checked reply. The request
    /// leaves the in-flight set after `on_reply` returns.
    pub fn non_blocking_request_with<F>(&self, request: ApiRequest, on_reply: F) -> RequestId
    where
        F: FnOnce(Result<HttpResponse, HttpError>) + Send + 'static,
    {
        self.dispatch(request, on_reply).0
    }

    /// Wait for the reply up to `timeout` (client default when `None`).
    ///
    /// A local timeout is not an error: it yields
    /// [`BlockingReply::NotCompleted`] while the request finishes in the
    /// background.
    #[instrument(skip(self, request), fields(method = %request.method(), target = ?request.target()))]
    pub async fn blocking_request(
        &self,
        request: ApiRequest,
        timeout: Option<Duration>,
    ) -> Result<BlockingReply, HttpError> {
        let timeout = timeout.unwrap_or(self.blocking_timeout);
        let reply = self.non_blocking_request(request);
        match tokio::time::timeout(timeout, reply).await {
            Ok(result) => result.map(BlockingReply::Completed),
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "blocking request did not complete");
                Ok(BlockingReply::NotCompleted)
            }
        }
    }

    fn dispatch<F>(&self, request: ApiRequest, on_reply: F) -> (RequestId, String)
    where
        F: FnOnce(Result<HttpResponse, HttpError>) + Send + 'static,
    {
        let prepared = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(err) => {
                let url = request.path_and_query();
                debug!(%url, error = %err, "request could not be prepared");
                tokio::spawn(async move { on_reply(Err(err)) });
                return (0, url);
            }
        };

        let url = prepared.url().to_string();
        let id = self.in_flight.register(request.method.clone(), url.clone());
        let guard = InFlightGuard::new(Arc::clone(&self.in_flight), id);
        let http = self.http.clone();
        let accepted = request.accepted;
        let task_url = url.clone();

        tokio::spawn(async move {
            let reply = check_reply(execute(&http, prepared, &task_url).await, &accepted);
            on_reply(reply);
            drop(guard);
        });

        (id, url)
    }
}

async fn execute(
    http: &ReqwestClient,
    request: reqwest::Request,
    url: &str,
) -> Result<HttpResponse, HttpError> {
    let method = request.method().clone();
    debug!(%method, %url, "sending HTTP request");

    let response = http.execute(request).await.map_err(|err| {
        debug!(%method, %url, error = %err, "HTTP request failed");
        HttpError::from_reqwest(url, &err)
    })?;

    let status = response.status();
    debug!(%method, %url, %status, "received HTTP response");
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|err| HttpError::from_reqwest(url, &err))?;

    Ok(HttpResponse { status: status.as_u16(), url: url.to_string(), headers, body: body.to_vec() })
}

/// Builder for [`SignedClient`].
#[derive(Debug)]
pub struct SignedClientBuilder {
    base_url: String,
    client_version: String,
    timeout: Duration,
    blocking_timeout: Duration,
    anonymous: Credentials,
    credentials: Option<Credentials>,
    user_agent: Option<String>,
}

impl Default for SignedClientBuilder {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            timeout: Duration::from_secs(30),
            blocking_timeout: Duration::from_millis(DEFAULT_BLOCKING_TIMEOUT_MS),
            anonymous: Credentials::new("anonymous", "anonymous"),
            credentials: None,
            user_agent: None,
        }
    }
}

impl SignedClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    /// Transport timeout for each request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    pub fn anonymous(mut self, credentials: Credentials) -> Self {
        self.anonymous = credentials;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<SignedClient, DiagSyncError> {
        let base_url = self.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| DiagSyncError::Config(format!("invalid server base URL {base_url:?}: {e}")))?;

        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        let http = builder.build().map_err(|err| {
            let infra: InfraError = err.into();
            DiagSyncError::from(infra)
        })?;

        Ok(SignedClient {
            http,
            base_url,
            client_version: self.client_version,
            anonymous: self.anonymous,
            credentials: RwLock::new(self.credentials),
            in_flight: Arc::new(InFlightRegistry::new()),
            blocking_timeout: self.blocking_timeout,
        })
    }
}
