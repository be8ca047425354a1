//! Acquisition of tracks for offline playback.
//!
//! `acquire` fetches raw audio from the conversion backend, transcodes it on a
//! blocking worker and persists the result. Calls are idempotent per track id
//! and concurrent calls for the same id share a single attempt.

use std::{collections::HashMap, sync::Arc};

use {
    bytes::Bytes,
    parking_lot::Mutex,
    thiserror::Error,
    tokio::{sync::watch, task::spawn_blocking},
    tracing::{debug, info, warn},
};

use crate::{
    audio::{
        backend::{BackendError, ConversionBackend},
        transcoder::Transcoder,
    },
    library::{
        models::{ArtifactMetadata, Track},
        store::{ArtifactStore, StoreError},
    },
};

/// Error type for acquisition.
///
/// Cloneable so that every caller joined on one attempt observes the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The track cannot be acquired as given.
    #[error("Invalid track: {reason}")]
    InvalidTrack { reason: String },
    /// The conversion backend failed its health check.
    #[error("Conversion backend unavailable: {reason}")]
    BackendUnavailable { reason: String },
    /// The backend refused or failed the download.
    #[error("Download failed: {reason}")]
    DownloadFailed { reason: String },
    /// The fetched audio could not be transcoded.
    #[error("Transcoding failed: {reason}")]
    TranscodeFailure { reason: String },
    /// The artifact store failed.
    #[error("Storage failure: {reason}")]
    StorageFailure { reason: String },
    /// The attempt this call was joined on was abandoned.
    #[error("Acquisition interrupted")]
    Interrupted,
}

impl From<StoreError> for AcquisitionError {
    fn from(e: StoreError) -> Self {
        AcquisitionError::StorageFailure {
            reason: e.to_string(),
        }
    }
}

/// Result of a successful `acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    /// The track was downloaded and stored by this attempt.
    Acquired(ArtifactMetadata),
    /// The track was already stored; nothing was fetched.
    AlreadyPresent,
}

type AttemptResult = Result<AcquisitionOutcome, AcquisitionError>;
type InFlightMap = Mutex<HashMap<String, watch::Receiver<Option<AttemptResult>>>>;

/// Removes the in-flight entry of an attempt however the attempt ends.
struct InFlightGuard<'a> {
    in_flight: &'a InFlightMap,
    track_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.track_id);
    }
}

/// Fetch, transcode and persist pipeline. The sole writer of offline artifacts.
pub struct AcquisitionPipeline {
    backend: Arc<dyn ConversionBackend>,
    transcoder: Arc<dyn Transcoder>,
    store: Arc<dyn ArtifactStore>,
    in_flight: InFlightMap,
}

impl AcquisitionPipeline {
    /// Creates a pipeline over its collaborators.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ConversionBackend>,
        transcoder: Arc<dyn Transcoder>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            backend,
            transcoder,
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The store artifacts are written to.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        Arc::clone(&self.store)
    }

    /// Number of attempts currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Downloads `track` for offline playback.
    ///
    /// Already stored tracks return `AlreadyPresent` without any network call.
    /// A call arriving while an attempt for the same id runs waits for that
    /// attempt and returns its result. There is no automatic retry.
    ///
    /// # Errors
    ///
    /// Returns `AcquisitionError` describing the failed stage. Nothing is
    /// persisted unless every stage succeeds.
    pub async fn acquire(&self, track: &Track) -> AttemptResult {
        if track.id.is_empty() {
            return Err(AcquisitionError::InvalidTrack {
                reason: "track id is empty".to_string(),
            });
        }

        let leader = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&track.id) {
                Some(receiver) => Err(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(track.id.clone(), receiver);
                    Ok(sender)
                }
            }
        };

        match leader {
            Ok(sender) => {
                let _guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    track_id: track.id.clone(),
                };
                let result = self.run_attempt(track).await;
                sender.send_replace(Some(result.clone()));
                result
            }
            Err(mut receiver) => {
                debug!("Joining in-flight acquisition of {}", track.id);
                match receiver.wait_for(Option::is_some).await {
                    Ok(result) => result
                        .clone()
                        .unwrap_or(Err(AcquisitionError::Interrupted)),
                    Err(_) => Err(AcquisitionError::Interrupted),
                }
            }
        }
    }

    async fn run_attempt(&self, track: &Track) -> AttemptResult {
        if self.store.contains(&track.id).await? {
            debug!("{} already stored, skipping download", track.id);
            return Ok(AcquisitionOutcome::AlreadyPresent);
        }

        self.backend
            .health()
            .await
            .map_err(|e| AcquisitionError::BackendUnavailable {
                reason: e.to_string(),
            })?;

        let raw = self.backend.fetch_raw(track).await.map_err(|e| {
            warn!("Download of {} failed: {e}", track.id);
            match e {
                BackendError::Status { body, .. } => AcquisitionError::DownloadFailed { reason: body },
                other => AcquisitionError::DownloadFailed {
                    reason: other.to_string(),
                },
            }
        })?;
        debug!("Fetched {} raw bytes for {}", raw.len(), track.id);

        let transcoder = Arc::clone(&self.transcoder);
        let transcoded = spawn_blocking(move || transcoder.transcode(raw))
            .await
            .map_err(|e| AcquisitionError::TranscodeFailure {
                reason: e.to_string(),
            })?
            .map_err(|e| {
                warn!("Transcoding of {} failed: {e}", track.id);
                AcquisitionError::TranscodeFailure {
                    reason: e.to_string(),
                }
            })?;

        let metadata = ArtifactMetadata::now(track, transcoded.bytes.len() as u64);
        self.store
            .put(&track.id, &transcoded.bytes, &metadata)
            .await?;

        info!(
            "Acquired {} ({} bytes, {:.0}s)",
            track.id, metadata.byte_size, transcoded.duration_secs
        );
        Ok(AcquisitionOutcome::Acquired(metadata))
    }

    /// Whether `track_id` is available offline.
    ///
    /// # Errors
    ///
    /// Returns `AcquisitionError::StorageFailure` if the store cannot be queried.
    pub async fn is_acquired(&self, track_id: &str) -> Result<bool, AcquisitionError> {
        Ok(self.store.contains(track_id).await?)
    }

    /// Loads the offline audio of `track_id`.
    ///
    /// # Errors
    ///
    /// Returns `AcquisitionError::StorageFailure` if the store cannot be read.
    pub async fn load(&self, track_id: &str) -> Result<Option<Bytes>, AcquisitionError> {
        Ok(self.store.get(track_id).await?)
    }

    /// Deletes the offline copy of `track_id`; a missing track is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AcquisitionError::StorageFailure` if the store cannot be written.
    pub async fn remove(&self, track_id: &str) -> Result<(), AcquisitionError> {
        self.store.delete(track_id).await?;
        info!("Removed offline copy of {track_id}");
        Ok(())
    }

    /// Metadata of every offline track, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AcquisitionError::StorageFailure` if the store cannot be read.
    pub async fn list(&self) -> Result<Vec<ArtifactMetadata>, AcquisitionError> {
        Ok(self.store.list_metadata().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering::SeqCst},
        },
        time::Duration,
    };

    use {
        async_trait::async_trait,
        bytes::Bytes,
        tokio::time::{sleep, timeout},
    };

    use crate::{
        audio::{
            acquisition::{AcquisitionError, AcquisitionOutcome, AcquisitionPipeline},
            backend::{BackendError, ConversionBackend},
            decoder::sine_wav,
            transcoder::{Mp3Transcoder, TranscodeError, TranscodedAudio, Transcoder},
        },
        library::{
            models::Track,
            store::{ArtifactStore, MemoryArtifactStore},
        },
    };

    #[derive(Default)]
    struct FakeBackend {
        healthy: bool,
        status_failure: Option<(u16, &'static str)>,
        hang: bool,
        fetches: AtomicUsize,
    }

    impl FakeBackend {
        fn healthy() -> Self {
            Self {
                healthy: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ConversionBackend for FakeBackend {
        async fn health(&self) -> Result<(), BackendError> {
            if self.healthy {
                Ok(())
            } else {
                Err(BackendError::Unavailable {
                    reason: "connection refused".to_string(),
                })
            }
        }

        async fn fetch_raw(&self, _track: &Track) -> Result<Bytes, BackendError> {
            self.fetches.fetch_add(1, SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            sleep(Duration::from_millis(20)).await;
            if let Some((status, body)) = self.status_failure {
                return Err(BackendError::Status {
                    status,
                    body: body.to_string(),
                });
            }
            Ok(sine_wav(8000, 1, 800))
        }
    }

    struct PassThrough;

    impl Transcoder for PassThrough {
        fn transcode(&self, raw: Bytes) -> Result<TranscodedAudio, TranscodeError> {
            Ok(TranscodedAudio {
                bytes: raw,
                duration_secs: 0.1,
            })
        }
    }

    struct Broken;

    impl Transcoder for Broken {
        fn transcode(&self, _raw: Bytes) -> Result<TranscodedAudio, TranscodeError> {
            Err(TranscodeError::EncoderError {
                reason: "boom".to_string(),
            })
        }
    }

    fn pipeline(
        backend: Arc<FakeBackend>,
        transcoder: Arc<dyn Transcoder>,
    ) -> (AcquisitionPipeline, Arc<MemoryArtifactStore>) {
        let store = Arc::new(MemoryArtifactStore::new());
        let pipeline = AcquisitionPipeline::new(backend, transcoder, store.clone());
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_acquire_is_idempotent() {
        let backend = Arc::new(FakeBackend::healthy());
        let (pipeline, store) = pipeline(Arc::clone(&backend), Arc::new(PassThrough));
        let track = Track::new("abc", "Song");

        let first = pipeline.acquire(&track).await.unwrap();
        assert!(matches!(first, AcquisitionOutcome::Acquired(ref m) if m.track_id == "abc"));

        let second = pipeline.acquire(&track).await.unwrap();
        assert_eq!(second, AcquisitionOutcome::AlreadyPresent);
        assert_eq!(backend.fetches.load(SeqCst), 1);
        assert_eq!(store.len(), 1);
        assert!(pipeline.is_acquired("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_fetches_once() {
        let backend = Arc::new(FakeBackend::healthy());
        let (pipeline, store) = pipeline(Arc::clone(&backend), Arc::new(PassThrough));
        let track = Track::new("abc", "Song");

        let (a, b) = tokio::join!(pipeline.acquire(&track), pipeline.acquire(&track));

        assert_eq!(a, b);
        assert!(matches!(a, Ok(AcquisitionOutcome::Acquired(_))));
        assert_eq!(backend.fetches.load(SeqCst), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(pipeline.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_backend_skips_fetch() {
        let backend = Arc::new(FakeBackend::default());
        let (pipeline, store) = pipeline(Arc::clone(&backend), Arc::new(PassThrough));

        let result = pipeline.acquire(&Track::new("abc", "Song")).await;

        assert!(matches!(
            result,
            Err(AcquisitionError::BackendUnavailable { .. })
        ));
        assert_eq!(backend.fetches.load(SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_reports_body() {
        let backend = Arc::new(FakeBackend {
            status_failure: Some((400, "invalid video id")),
            ..FakeBackend::healthy()
        });
        let (pipeline, store) = pipeline(backend, Arc::new(PassThrough));

        let result = pipeline.acquire(&Track::new("bad", "Song")).await;

        assert_eq!(
            result,
            Err(AcquisitionError::DownloadFailed {
                reason: "invalid video id".to_string()
            })
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_transcode_failure_persists_nothing() {
        let backend = Arc::new(FakeBackend::healthy());
        let (pipeline, store) = pipeline(backend, Arc::new(Broken));

        let result = pipeline.acquire(&Track::new("abc", "Song")).await;

        assert!(matches!(
            result,
            Err(AcquisitionError::TranscodeFailure { .. })
        ));
        assert!(store.is_empty());
        assert_eq!(pipeline.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_id_is_invalid() {
        let backend = Arc::new(FakeBackend::healthy());
        let (pipeline, _store) = pipeline(Arc::clone(&backend), Arc::new(PassThrough));

        let result = pipeline.acquire(&Track::new("", "Nothing")).await;
        assert!(matches!(result, Err(AcquisitionError::InvalidTrack { .. })));
        assert_eq!(backend.fetches.load(SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abandoned_leader_interrupts_waiters() {
        let backend = Arc::new(FakeBackend {
            hang: true,
            ..FakeBackend::healthy()
        });
        let (pipeline, _store) = pipeline(backend, Arc::new(PassThrough));
        let pipeline = Arc::new(pipeline);
        let track = Track::new("abc", "Song");

        let leader = {
            let pipeline = Arc::clone(&pipeline);
            let track = track.clone();
            tokio::spawn(async move { pipeline.acquire(&track).await })
        };
        timeout(Duration::from_secs(2), async {
            while pipeline.in_flight_count() == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let waiter = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.acquire(&track).await })
        };
        sleep(Duration::from_millis(20)).await;
        leader.abort();

        let result = timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert_eq!(result, Err(AcquisitionError::Interrupted));
        assert_eq!(pipeline.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_with_mp3_transcoder() {
        let backend = Arc::new(FakeBackend::healthy());
        let (pipeline, store) = pipeline(backend, Arc::new(Mp3Transcoder::default()));

        pipeline.acquire(&Track::new("tone", "Tone")).await.unwrap();

        let listed = pipeline.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        let stored = store.get("tone").await.unwrap().unwrap();
        assert_eq!(listed[0].byte_size, stored.len() as u64);

        pipeline.remove("tone").await.unwrap();
        assert!(pipeline.load("tone").await.unwrap().is_none());
    }
}
