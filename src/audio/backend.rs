//! Client of the remote conversion backend.
//!
//! The backend exposes `GET /health` for liveness and `POST /download/{id}`
//! which answers with the raw audio of a track.

use std::time::Duration;

use {
    async_trait::async_trait,
    bytes::Bytes,
    reqwest::{Client, Url},
    serde::Serialize,
    thiserror::Error,
    tracing::debug,
};

use crate::library::models::Track;

/// Timeout of the liveness check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for backend calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend did not answer its health check.
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },
    /// The backend answered a request with a failure status.
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The request could not be sent or its body not read.
    #[error("Transport error: {reason}")]
    Transport { reason: String },
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Transport {
            reason: e.to_string(),
        }
    }
}

/// Remote service turning a content id into raw audio.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Checks that the backend is reachable and healthy.
    async fn health(&self) -> Result<(), BackendError>;

    /// Downloads the raw audio of `track`.
    async fn fetch_raw(&self, track: &Track) -> Result<Bytes, BackendError>;
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    title: &'a str,
}

/// HTTP implementation of `ConversionBackend`.
#[derive(Debug, Clone)]
pub struct HttpConversionBackend {
    client: Client,
    base_url: Url,
}

impl HttpConversionBackend {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unavailable` if `base_url` is not a valid URL, or
    /// `BackendError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url).map_err(|e| BackendError::Unavailable {
            reason: format!("invalid backend URL {base_url}: {e}"),
        })?;
        Ok(Self {
            client: Client::builder().build()?,
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Unavailable {
                reason: format!("invalid endpoint {path}: {e}"),
            })
    }
}

#[async_trait]
impl ConversionBackend for HttpConversionBackend {
    async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(self.endpoint("/health")?)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable {
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Unavailable {
                reason: format!("health check returned {}", response.status()),
            })
        }
    }

    async fn fetch_raw(&self, track: &Track) -> Result<Bytes, BackendError> {
        let url = self.endpoint(&format!("/download/{}", track.id))?;
        debug!("Requesting {url}");

        let response = self
            .client
            .post(url)
            .json(&DownloadRequest {
                title: &track.title,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::audio::backend::{BackendError, HttpConversionBackend};

    #[test]
    fn test_endpoints_are_rooted_at_base() {
        let backend = HttpConversionBackend::new("http://localhost:5000/api").unwrap();
        assert_eq!(
            backend.endpoint("/download/abc").unwrap().as_str(),
            "http://localhost:5000/download/abc"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpConversionBackend::new("localhost without scheme"),
            Err(BackendError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_status_error_display() {
        let error = BackendError::Status {
            status: 400,
            body: "invalid id".to_string(),
        };
        assert_eq!(error.to_string(), "Backend returned 400: invalid id");
    }
}
