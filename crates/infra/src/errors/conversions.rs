//! Conversions from external infrastructure errors into domain errors.

use diagsync_domain::DiagSyncError;

use crate::cache::StoreError;
use crate::http::HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub DiagSyncError);

impl From<InfraError> for DiagSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<DiagSyncError> for InfraError {
    fn from(value: DiagSyncError) -> Self {
        InfraError(value)
    }
}

trait IntoDiagSyncError {
    fn into_diagsync(self) -> DiagSyncError;
}

fn status_error(code: u16, message: String) -> DiagSyncError {
    match code {
        401 | 403 => DiagSyncError::Auth(message),
        404 => DiagSyncError::NotFound(message),
        _ => DiagSyncError::Http(message),
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → DiagSyncError */
/* -------------------------------------------------------------------------- */

impl IntoDiagSyncError for reqwest::Error {
    fn into_diagsync(self) -> DiagSyncError {
        if self.is_timeout() {
            return DiagSyncError::Network("HTTP request timed out".into());
        }
        if self.is_connect() {
            return DiagSyncError::Network("HTTP connection failure".into());
        }
        if self.is_builder() {
            return DiagSyncError::Config(format!("HTTP client setup failed: {self}"));
        }
        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));
            return status_error(code, message);
        }
        DiagSyncError::Network(self.to_string())
    }
}

impl From<reqwest::Error> for InfraError {
    fn from(value: reqwest::Error) -> Self {
        InfraError(value.into_diagsync())
    }
}

/* -------------------------------------------------------------------------- */
/* HttpError → DiagSyncError */
/* -------------------------------------------------------------------------- */

impl IntoDiagSyncError for HttpError {
    fn into_diagsync(self) -> DiagSyncError {
        match &self {
            HttpError::Status { status, .. } => status_error(*status, self.to_string()),
            HttpError::Transport { .. } => DiagSyncError::Network(self.to_string()),
            HttpError::InvalidRequest(message) => DiagSyncError::InvalidInput(message.clone()),
            HttpError::Decode { .. } => DiagSyncError::Serialization(self.to_string()),
        }
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_diagsync())
    }
}

impl From<HttpError> for DiagSyncError {
    fn from(value: HttpError) -> Self {
        value.into_diagsync()
    }
}

/* -------------------------------------------------------------------------- */
/* StoreError → DiagSyncError */
/* -------------------------------------------------------------------------- */

impl IntoDiagSyncError for StoreError {
    fn into_diagsync(self) -> DiagSyncError {
        match self {
            StoreError::Tampered(path) => DiagSyncError::Tampered(path.display().to_string()),
            StoreError::Io { path, source } => {
                DiagSyncError::Storage(format!("{}: {source}", path.display()))
            }
            StoreError::Serialization { path, message } => {
                DiagSyncError::Serialization(format!("{}: {message}", path.display()))
            }
        }
    }
}

impl From<StoreError> for InfraError {
    fn from(value: StoreError) -> Self {
        InfraError(value.into_diagsync())
    }
}

impl From<StoreError> for DiagSyncError {
    fn from(value: StoreError) -> Self {
        value.into_diagsync()
    }
}

/* -------------------------------------------------------------------------- */
/* std::io::Error → DiagSyncError */
/* -------------------------------------------------------------------------- */

impl IntoDiagSyncError for std::io::Error {
    fn into_diagsync(self) -> DiagSyncError {
        match self.kind() {
            std::io::ErrorKind::NotFound => DiagSyncError::NotFound(self.to_string()),
            _ => DiagSyncError::Storage(self.to_string()),
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        InfraError(value.into_diagsync())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use reqwest::{Client, StatusCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::TransportErrorKind;

    #[test]
    fn status_errors_map_by_code() {
        let unauthorized = HttpError::Status {
            status: 401,
            url: "https://api.example.com/diagrams".into(),
            message: "Unauthorized".into(),
        };
        assert!(matches!(DiagSyncError::from(unauthorized), DiagSyncError::Auth(_)));

        let missing = HttpError::Status {
            status: 404,
            url: "https://api.example.com/diagrams/9".into(),
            message: "Not Found".into(),
        };
        assert!(matches!(DiagSyncError::from(missing), DiagSyncError::NotFound(_)));

        let server = HttpError::Status {
            status: 502,
            url: "https://api.example.com/diagrams".into(),
            message: "Bad Gateway".into(),
        };
        match DiagSyncError::from(server) {
            DiagSyncError::Http(msg) => assert!(msg.contains("502")),
            other => panic!("expected http error, got {other:?}"),
        }
    }

    #[test]
    fn transport_errors_are_network_errors() {
        let err = HttpError::Transport {
            kind: TransportErrorKind::HostNotFound,
            url: "https://nowhere.invalid".into(),
            message: "dns error".into(),
        };
        assert_eq!(DiagSyncError::from(err).label(), "network");
    }

    #[test]
    fn tampered_store_file_keeps_its_path() {
        let err = StoreError::Tampered(PathBuf::from("/data/index.json"));
        match DiagSyncError::from(err) {
            DiagSyncError::Tampered(path) => assert!(path.ends_with("index.json")),
            other => panic!("expected tampered, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reqwest_status_403_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(StatusCode::FORBIDDEN))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get(server.uri()).send().await.unwrap().error_for_status().unwrap_err();

        let mapped: DiagSyncError = InfraError::from(error).into();
        match mapped {
            DiagSyncError::Auth(msg) => assert!(msg.contains("403")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }
}
