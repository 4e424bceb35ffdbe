//! Request description consumed by [`super::SignedClient`]

use diagsync_domain::constants::DEFAULT_CONTENT_TYPE;
use reqwest::Method;
use serde::Serialize;

use super::error::HttpError;

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Path relative to the API base URL; the request is signed.
    Api(String),
    /// Absolute URL outside the API; sent unsigned.
    External(String),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) target: Target,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) content_type: String,
    pub(crate) anonymous: bool,
    pub(crate) accepted: Vec<u16>,
    pub(crate) headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            target: Target::Api(path.into()),
            query: Vec::new(),
            body: Vec::new(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            anonymous: false,
            accepted: vec![200],
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Unsigned request to an absolute URL.
    pub fn external(method: Method, url: impl Into<String>) -> Self {
        Self { target: Target::External(url.into()), ..Self::new(method, String::new()) }
    }

    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        self.body = serde_json::to_vec(value)
            .map_err(|e| HttpError::InvalidRequest(format!("failed to encode body: {e}")))?;
        self.content_type = DEFAULT_CONTENT_TYPE.to_string();
        Ok(self)
    }

    pub fn body(mut self, body: Vec<u8>, content_type: impl Into<String>) -> Self {
        self.body = body;
        self.content_type = content_type.into();
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sign with the public credential instead of the session user.
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Statuses treated as success. Defaults to `[200]`.
    pub fn accept(mut self, statuses: &[u16]) -> Self {
        self.accepted = statuses.to_vec();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn accepted(&self) -> &[u16] {
        &self.accepted
    }

    /// Path (or URL) with the encoded query appended.
    pub(crate) fn path_and_query(&self) -> String {
        let base = match &self.target {
            Target::Api(path) | Target::External(path) => path.as_str(),
        };
        if self.query.is_empty() {
            return base.to_string();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}{query}")
    }
}
