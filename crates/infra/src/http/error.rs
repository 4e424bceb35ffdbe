//! HTTP error taxonomy
//!
//! Every failure a caller can observe from the signed client is one
//! [`HttpError`]. Transport failures carry no status code; status failures
//! carry the code that fell outside the accepted set.

use std::error::Error as _;
use std::fmt;

use thiserror::Error;

/// Transport-level failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    HostNotFound,
    ConnectionRefused,
    Tls,
    Timeout,
    /// The request task went away before producing a reply.
    Cancelled,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HostNotFound => "no internet connection",
            Self::ConnectionRefused => "connection refused",
            Self::Tls => "TLS handshake with server failed",
            Self::Timeout => "request timed out",
            Self::Cancelled => "request cancelled",
            Self::Other => "transport error",
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("{kind}: {message} ({url})")]
    Transport { kind: TransportErrorKind, url: String, message: String },

    #[error("HTTP {status} from {url}: {message}")]
    Status { status: u16, url: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl HttpError {
    /// Status code of the reply, `None` when no response arrived.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } | Self::Decode { url, .. } => {
                Some(url)
            }
            Self::InvalidRequest(_) => None,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Host lookup, refused connection or timeout.
    pub fn is_offline(&self) -> bool {
        matches!(
            self.transport_kind(),
            Some(
                TransportErrorKind::HostNotFound
                    | TransportErrorKind::ConnectionRefused
                    | TransportErrorKind::Timeout
            )
        )
    }

    pub(crate) fn cancelled(url: &str) -> Self {
        Self::Transport {
            kind: TransportErrorKind::Cancelled,
            url: url.to_string(),
            message: "reply dropped before completion".into(),
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        Self::Transport { kind: classify_transport(err), url: url.to_string(), message: err.to_string() }
    }
}

/// Classify a reqwest failure by walking its source chain.
pub fn classify_transport(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    return TransportErrorKind::ConnectionRefused
                }
                std::io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }

        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return TransportErrorKind::HostNotFound;
        }
        if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        if text.contains("connection refused") {
            return TransportErrorKind::ConnectionRefused;
        }
        source = cause.source();
    }

    if err.is_connect() {
        return TransportErrorKind::ConnectionRefused;
    }
    TransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn status_errors_expose_code_and_url() {
        let err = HttpError::Status {
            status: 503,
            url: "https://api.example.com/diagrams".into(),
            message: "Service Unavailable".into(),
        };
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.url(), Some("https://api.example.com/diagrams"));
        assert!(!err.is_offline());
    }

    #[test]
    fn transport_errors_have_no_status() {
        let err = HttpError::cancelled("https://api.example.com/diagrams/4");
        assert_eq!(err.status_code(), None);
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = client.get(format!("http://{addr}/diagrams")).send().await.unwrap_err();

        let mapped = HttpError::from_reqwest("http://local/diagrams", &err);
        assert_eq!(mapped.transport_kind(), Some(TransportErrorKind::ConnectionRefused));
        assert!(mapped.is_offline());
    }
}
