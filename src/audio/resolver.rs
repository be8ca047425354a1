//! Resolution of content identifiers into fetchable audio URLs.
//!
//! Mirrors are tried in configured order. Each candidate URL is probed once
//! with a short timeout and the first live one wins.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    reqwest::{Client, Url},
    thiserror::Error,
    tracing::{debug, warn},
};

use crate::config::settings::UserSettings;

/// Error type for source resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The content identifier is empty.
    #[error("Track id is empty")]
    EmptyTrackId,
    /// Every probed mirror failed; `attempted` counts the probes issued.
    #[error("All {attempted} mirrors are unavailable")]
    AllMirrorsUnavailable { attempted: usize },
}

/// Error type for a single liveness probe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// No answer within the probe timeout.
    #[error("Probe timed out")]
    Timeout,
    /// The mirror answered with a non-success status.
    #[error("Mirror answered with status {0}")]
    Status(u16),
    /// Connection-level failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Liveness check of a candidate audio URL.
#[async_trait]
pub trait MirrorProbe: Send + Sync {
    /// Probes `url`, succeeding only on a 2xx answer within `timeout`.
    async fn probe(&self, url: &Url, timeout: Duration) -> Result<(), ProbeError>;
}

/// `HEAD` probe over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Creates a probe with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the client cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().build()?,
        })
    }

    /// Creates a probe sharing an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MirrorProbe for HttpProbe {
    async fn probe(&self, url: &Url, timeout: Duration) -> Result<(), ProbeError> {
        let response = self
            .client
            .head(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

/// Maps content identifiers to audio URLs on the first live mirror.
#[derive(Clone)]
pub struct SourceResolver {
    mirrors: Vec<String>,
    quality: String,
    probe_timeout: Duration,
    probe: Arc<dyn MirrorProbe>,
}

impl SourceResolver {
    /// Creates a resolver.
    ///
    /// # Arguments
    ///
    /// * `mirrors` - Mirror base URLs in preference order.
    /// * `quality` - Audio quality selector (itag).
    /// * `probe_timeout` - Timeout of each probe.
    /// * `probe` - Liveness check implementation.
    #[must_use]
    pub fn new(
        mirrors: Vec<String>,
        quality: impl Into<String>,
        probe_timeout: Duration,
        probe: Arc<dyn MirrorProbe>,
    ) -> Self {
        Self {
            mirrors,
            quality: quality.into(),
            probe_timeout,
            probe,
        }
    }

    /// Creates a resolver from user settings.
    #[must_use]
    pub fn from_settings(settings: &UserSettings, probe: Arc<dyn MirrorProbe>) -> Self {
        Self::new(
            settings.mirrors.clone(),
            settings.mirror_quality.clone(),
            settings.probe_timeout(),
            probe,
        )
    }

    /// Configured mirrors in preference order.
    #[must_use]
    pub fn mirrors(&self) -> &[String] {
        &self.mirrors
    }

    /// Builds the audio URL of `track_id` on the mirror at `base`.
    ///
    /// Returns `None` if `base` is not a valid URL.
    #[must_use]
    pub fn audio_url(&self, base: &str, track_id: &str) -> Option<Url> {
        let endpoint = format!("{}/latest_version", base.trim_end_matches('/'));
        Url::parse_with_params(&endpoint, &[("id", track_id), ("itag", self.quality.as_str())])
            .ok()
    }

    /// Resolves `track_id` to the audio URL of the first mirror passing its probe.
    ///
    /// Each mirror is probed exactly once; there is no retry loop.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError::EmptyTrackId` for an empty id and
    /// `ResolutionError::AllMirrorsUnavailable` when every probe fails.
    pub async fn resolve(&self, track_id: &str) -> Result<Url, ResolutionError> {
        if track_id.is_empty() {
            return Err(ResolutionError::EmptyTrackId);
        }

        let mut attempted = 0;
        for base in &self.mirrors {
            let Some(url) = self.audio_url(base, track_id) else {
                warn!("Skipping malformed mirror {base}");
                continue;
            };

            attempted += 1;
            match self.probe.probe(&url, self.probe_timeout).await {
                Ok(()) => {
                    debug!("Resolved {track_id} via {base}");
                    return Ok(url);
                }
                Err(e) => warn!("Mirror {base} unavailable for {track_id}: {e}"),
            }
        }

        Err(ResolutionError::AllMirrorsUnavailable { attempted })
    }
}
