//! Request signing
//!
//! The signable string is
//! `verb \n content-hash \n content-type \n date \n resource`, where the
//! resource is the URL path plus `?query` when present. The signature is
//! HMAC-SHA256 over that string, lowercase hex.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

use super::error::HttpError;

type HmacSha256 = Hmac<Sha256>;

/// Identity used to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { user: user.into(), secret: secret.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("user", &self.user).field("secret", &"***").finish()
    }
}

/// Hex SHA-256 of the request body.
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// RFC 1123 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Path plus query of `url`, as signed.
pub fn signed_resource(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

pub fn canonical_string(
    verb: &str,
    content_hash: &str,
    content_type: &str,
    date: &str,
    resource: &str,
) -> String {
    format!("{verb}\n{content_hash}\n{content_type}\n{date}\n{resource}")
}

pub fn sign(secret: &str, canonical: &str) -> Result<String, HttpError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| HttpError::InvalidRequest(format!("failed to initialize HMAC: {e}")))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `FD-Authentication` header value.
pub fn auth_header(user: &str, signature: &str) -> String {
    format!("{user}:{signature}")
}
