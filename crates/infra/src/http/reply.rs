//! Reply types handed back by the signed client

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use super::error::HttpError;
use super::in_flight::RequestId;

/// A fully read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HttpError::Decode { url: self.url.clone(), message: e.to_string() })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Outcome of a blocking request
#[derive(Debug, Clone)]
pub enum BlockingReply {
    Completed(HttpResponse),
    /// The local timeout elapsed first. The request keeps running and its
    /// late result is discarded.
    NotCompleted,
}

impl BlockingReply {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn into_response(self) -> Option<HttpResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::NotCompleted => None,
        }
    }
}

/// Resolves exactly once with the checked reply of a non-blocking request.
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    url: String,
    rx: oneshot::Receiver<Result<HttpResponse, HttpError>>,
}

impl PendingReply {
    pub(crate) fn new(
        id: RequestId,
        url: String,
        rx: oneshot::Receiver<Result<HttpResponse, HttpError>>,
    ) -> Self {
        Self { id, url, rx }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Future for PendingReply {
    type Output = Result<HttpResponse, HttpError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let url = self.url.clone();
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(HttpError::cancelled(&url))))
    }
}

/// Check a reply against the accepted statuses.
///
/// Transport errors pass through unchanged; a response outside `accepted`
/// becomes [`HttpError::Status`].
pub fn check_reply(
    reply: Result<HttpResponse, HttpError>,
    accepted: &[u16],
) -> Result<HttpResponse, HttpError> {
    let response = reply?;
    if accepted.contains(&response.status) {
        return Ok(response);
    }
    let reason = reqwest::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("unexpected status");
    let mut message = reason.to_string();
    let body = response.text();
    if !body.is_empty() {
        message.push_str(": ");
        message.extend(body.chars().take(200));
    }
    Err(HttpError::Status { status: response.status, url: response.url, message })
}
