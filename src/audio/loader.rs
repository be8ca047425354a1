//! Download of resolved audio URLs into memory.

use {
    async_trait::async_trait,
    bytes::{Bytes, BytesMut},
    reqwest::{Client, Url},
    thiserror::Error,
    tokio::task::spawn_blocking,
    tracing::debug,
};

use crate::audio::decoder::probe_duration;

/// Error type for media loading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// The server answered with a failure status.
    #[error("Media request returned status {0}")]
    Status(u16),
    /// The request failed or the body was cut short.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for LoaderError {
    fn from(e: reqwest::Error) -> Self {
        LoaderError::Transport(e.to_string())
    }
}

/// Media held in memory.
#[derive(Debug, Clone)]
pub struct LoadedMedia {
    /// Encoded audio.
    pub bytes: Bytes,
    /// Duration, when it could be determined.
    pub duration_secs: Option<f64>,
}

/// Fetches audio into memory.
#[async_trait]
pub trait MediaLoader: Send + Sync {
    /// Downloads `url`, reporting progress in percent (`0..=100`) as it goes.
    async fn load(
        &self,
        url: &Url,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<LoadedMedia, LoaderError>;
}

/// Largest body size reserved up front from a `Content-Length` header.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Capacity to reserve for a body announced as `content_length` bytes.
///
/// The header is untrusted, so the reservation is capped and the buffer grows
/// past it as chunks arrive.
#[must_use]
pub fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length
        .and_then(|len| usize::try_from(len).ok())
        .unwrap_or(0)
        .min(MAX_PREALLOC)
}

/// Percentage of `received` out of `total`, clamped to `0..=100`.
#[must_use]
pub fn percent(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (u128::from(received) * 100 / u128::from(total)).min(100) as u8
}

/// HTTP implementation of `MediaLoader`.
#[derive(Debug, Clone)]
pub struct HttpMediaLoader {
    client: Client,
}

impl HttpMediaLoader {
    /// Creates a loader with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the client cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().build()?,
        })
    }

    /// Creates a loader sharing an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaLoader for HttpMediaLoader {
    async fn load(
        &self,
        url: &Url,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<LoadedMedia, LoaderError> {
        let mut response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::Status(status.as_u16()));
        }

        let total = response.content_length().unwrap_or(0);
        let mut body = BytesMut::with_capacity(initial_capacity(response.content_length()));
        let mut last_reported = None;

        progress(0);
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            let pct = percent(body.len() as u64, total);
            if last_reported != Some(pct) {
                progress(pct);
                last_reported = Some(pct);
            }
        }
        progress(100);

        let bytes = body.freeze();
        let probe_input = bytes.clone();
        let duration_secs = spawn_blocking(move || probe_duration(probe_input, None).ok())
            .await
            .ok()
            .flatten();
        debug!(
            "Loaded {} bytes from {}, duration {:?}",
            bytes.len(),
            url.host_str().unwrap_or_default(),
            duration_secs
        );

        Ok(LoadedMedia {
            bytes,
            duration_secs,
        })
    }
}
