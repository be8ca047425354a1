//! Look-ahead buffering of upcoming queue entries.
//!
//! The `BufferManager` keeps the current track and as many upcoming tracks as
//! fit in a duration budget loaded in memory, so playback survives brief network
//! loss or a failing source. The budget is filled front to back and never
//! evicts on its own.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering::SeqCst},
    },
};

use {
    bytes::Bytes,
    chrono::{DateTime, Utc},
    parking_lot::{Mutex, RwLock},
    thiserror::Error,
    tokio::{
        spawn,
        sync::watch,
        task::{JoinHandle, spawn_blocking},
    },
    tracing::{debug, warn},
};

use crate::{
    audio::{
        decoder::probe_duration,
        loader::{LoadedMedia, LoaderError, MediaLoader},
        resolver::{ResolutionError, SourceResolver},
    },
    config::settings::UserSettings,
    library::{models::Track, store::ArtifactStore},
};

/// Error type for buffering a single track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// No mirror could serve the track.
    #[error("Resolution error: {0}")]
    ResolutionError(#[from] ResolutionError),
    /// The audio could not be downloaded.
    #[error("Loader error: {0}")]
    LoaderError(#[from] LoaderError),
    /// The offline store failed.
    #[error("Store error: {reason}")]
    StoreError { reason: String },
    /// The load this call waited on was abandoned.
    #[error("Buffering interrupted")]
    Interrupted,
}

type LoadResult = Result<(), BufferError>;

/// Shared, immutable audio payload of a buffered track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    id: u64,
    bytes: Bytes,
}

impl MediaHandle {
    /// Identity of the buffered payload; equal across clones.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Encoded audio.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// A track held in the look-ahead buffer.
#[derive(Debug, Clone)]
pub struct BufferedArtifact {
    /// Buffered track id.
    pub track_id: String,
    /// Payload handed to the playback surface.
    pub handle: MediaHandle,
    /// Completion time.
    pub buffered_at: DateTime<Utc>,
    /// Duration counted against the budget.
    pub duration_secs: f64,
    seq: u64,
}

/// Ceiling of the look-ahead buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferBudget {
    /// Maximum seconds of buffered audio.
    pub budget_secs: f64,
    /// Duration assumed for tracks without a duration hint.
    pub estimated_track_secs: f64,
}

impl Default for BufferBudget {
    fn default() -> Self {
        Self {
            budget_secs: 1200.0,
            estimated_track_secs: 240.0,
        }
    }
}

impl BufferBudget {
    /// Budget configured in user settings.
    #[must_use]
    pub fn from_settings(settings: &UserSettings) -> Self {
        Self {
            budget_secs: settings.buffer_budget_secs,
            estimated_track_secs: settings.estimated_track_secs,
        }
    }

    /// Duration to reserve for `track` before its audio is known.
    #[must_use]
    pub fn estimate(&self, track: &Track) -> f64 {
        track.duration_secs.unwrap_or(self.estimated_track_secs)
    }
}

/// Snapshot of the buffer for display.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferInfo {
    /// Buffered ids in completion order.
    pub buffered_track_ids: Vec<String>,
    /// Sum of buffered durations.
    pub total_buffered_secs: f64,
    /// Configured ceiling.
    pub budget_secs: f64,
    /// Whether any track is being buffered.
    pub is_buffering: bool,
    /// Progress of the current track in percent.
    pub progress: u8,
}

/// Receives buffering events. All methods default to no-ops.
pub trait BufferObserver: Send + Sync {
    /// Download progress of the current track.
    fn on_progress(&self, _track: &Track, _percent: u8) {}

    /// `track` entered the buffer.
    fn on_complete(&self, _track: &Track) {}

    /// Buffering `track` failed; other tracks are unaffected.
    fn on_error(&self, _track: &Track, _error: &BufferError) {}
}

struct NoopObserver;

impl BufferObserver for NoopObserver {}

/// Outcome of a reservation attempt.
#[derive(Debug)]
enum Reservation {
    Reserved,
    AlreadyBuffered,
    /// Another task is loading the track; the receiver yields its result.
    InFlight(watch::Receiver<Option<LoadResult>>),
    OverBudget,
}

/// A load in progress.
struct PendingLoad {
    reserved_secs: f64,
    done: watch::Sender<Option<LoadResult>>,
}

struct BufferState {
    artifacts: HashMap<String, BufferedArtifact>,
    in_flight: HashMap<String, PendingLoad>,
    /// Track named current by the latest `ensure_buffered` call.
    current_id: Option<String>,
    budget: BufferBudget,
    progress: u8,
    next_seq: u64,
    next_handle_id: u64,
}

impl BufferState {
    fn buffered_secs(&self) -> f64 {
        self.artifacts.values().map(|a| a.duration_secs).sum()
    }

    fn committed_secs(&self) -> f64 {
        self.buffered_secs()
            + self
                .in_flight
                .values()
                .map(|load| load.reserved_secs)
                .sum::<f64>()
    }

    fn is_current(&self, track_id: &str) -> bool {
        self.current_id.as_deref() == Some(track_id)
    }

    fn reserve(&mut self, track_id: &str, estimate: f64, forced: bool) -> Reservation {
        if self.artifacts.contains_key(track_id) {
            return Reservation::AlreadyBuffered;
        }
        if let Some(load) = self.in_flight.get(track_id) {
            return Reservation::InFlight(load.done.subscribe());
        }
        if !forced && self.committed_secs() + estimate > self.budget.budget_secs {
            return Reservation::OverBudget;
        }
        let (done, _) = watch::channel(None);
        self.in_flight.insert(
            track_id.to_string(),
            PendingLoad {
                reserved_secs: estimate,
                done,
            },
        );
        Reservation::Reserved
    }
}

/// Releases a reservation whose load was dropped before finishing.
///
/// Dropping the pending load closes its channel, so joined callers see
/// `BufferError::Interrupted` instead of waiting forever.
struct ReservationGuard<'a> {
    state: &'a Mutex<BufferState>,
    track_id: &'a str,
    armed: bool,
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().in_flight.remove(self.track_id);
        }
    }
}

struct Inner {
    state: Mutex<BufferState>,
    generation: AtomicU64,
    resolver: SourceResolver,
    loader: Arc<dyn MediaLoader>,
    store: Option<Arc<dyn ArtifactStore>>,
    observer: RwLock<Arc<dyn BufferObserver>>,
}

/// Background walk over upcoming tracks, started by `ensure_buffered`.
pub struct LookAhead {
    /// Result of buffering the current track.
    pub foreground: Result<(), BufferError>,
    walk: JoinHandle<()>,
}

impl LookAhead {
    /// Waits for the background walk to stop.
    pub async fn finished(self) {
        if let Err(e) = self.walk.await {
            warn!("Look-ahead walk ended abnormally: {e}");
        }
    }

    /// Whether the background walk has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.walk.is_finished()
    }
}

/// Time-budgeted in-memory buffer of upcoming tracks.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct BufferManager {
    inner: Arc<Inner>,
}

impl BufferManager {
    /// Creates an empty buffer.
    ///
    /// # Arguments
    ///
    /// * `resolver` - Source of audio URLs for online tracks.
    /// * `loader` - Downloader of resolved URLs.
    /// * `budget` - Buffer ceiling.
    #[must_use]
    pub fn new(resolver: SourceResolver, loader: Arc<dyn MediaLoader>, budget: BufferBudget) -> Self {
        Self::build(resolver, loader, budget, None)
    }

    /// Creates an empty buffer that reads offline tracks from `store`.
    #[must_use]
    pub fn with_store(
        resolver: SourceResolver,
        loader: Arc<dyn MediaLoader>,
        budget: BufferBudget,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self::build(resolver, loader, budget, Some(store))
    }

    fn build(
        resolver: SourceResolver,
        loader: Arc<dyn MediaLoader>,
        budget: BufferBudget,
        store: Option<Arc<dyn ArtifactStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BufferState {
                    artifacts: HashMap::new(),
                    in_flight: HashMap::new(),
                    current_id: None,
                    budget,
                    progress: 0,
                    next_seq: 0,
                    next_handle_id: 0,
                }),
                generation: AtomicU64::new(0),
                resolver,
                loader,
                store,
                observer: RwLock::new(Arc::new(NoopObserver)),
            }),
        }
    }

    /// Replaces the event observer.
    pub fn set_observer(&self, observer: Arc<dyn BufferObserver>) {
        *self.inner.observer.write() = observer;
    }

    /// Replaces the budget. Already buffered tracks are kept.
    pub fn set_budget(&self, budget: BufferBudget) {
        self.inner.state.lock().budget = budget;
    }

    /// Buffers `current` and then the tracks following it in `upcoming`.
    ///
    /// The current track is buffered regardless of the budget and awaited here,
    /// with progress reported to the observer. When an earlier walk is already
    /// loading it, this call waits for that load and reports its progress.
    /// Before that, a background walk is
    /// spawned over the entries after `current` in `upcoming` (all of them when
    /// `current` is absent). The walk stops at the first entry that would exceed
    /// the budget, or as soon as a newer call supersedes it.
    pub async fn ensure_buffered(&self, current: &Track, upcoming: &[Track]) -> LookAhead {
        let generation = self.inner.generation.fetch_add(1, SeqCst) + 1;

        let reservation = {
            let mut state = self.inner.state.lock();
            state.current_id = Some(current.id.clone());
            state.progress = 0;
            let estimate = state.budget.estimate(current);
            state.reserve(&current.id, estimate, true)
        };

        let start = upcoming
            .iter()
            .position(|t| t.id == current.id)
            .map_or(0, |pos| pos + 1);
        let rest = upcoming[start..].to_vec();
        let walk = spawn(Arc::clone(&self.inner).walk(generation, rest));

        let foreground = match reservation {
            Reservation::Reserved => self.inner.buffer_one(current, true).await,
            Reservation::AlreadyBuffered => {
                self.inner.report_ready(current);
                Ok(())
            }
            Reservation::InFlight(receiver) => self.inner.join(current, receiver).await,
            // Forced reservations never exceed the budget.
            Reservation::OverBudget => Ok(()),
        };

        LookAhead { foreground, walk }
    }

    /// Whether `track_id` is buffered.
    #[must_use]
    pub fn is_buffered(&self, track_id: &str) -> bool {
        self.inner.state.lock().artifacts.contains_key(track_id)
    }

    /// Handle of the buffered payload of `track_id`.
    #[must_use]
    pub fn get_buffered(&self, track_id: &str) -> Option<MediaHandle> {
        self.inner
            .state
            .lock()
            .artifacts
            .get(track_id)
            .map(|a| a.handle.clone())
    }

    /// Drops `track_id` from the buffer; absent ids are ignored.
    pub fn evict(&self, track_id: &str) {
        if self.inner.state.lock().artifacts.remove(track_id).is_some() {
            debug!("Evicted {track_id} from look-ahead buffer");
        }
    }

    /// Drops every buffered track and stops running walks.
    ///
    /// Loads already in flight are not cancelled; their tracks enter the
    /// buffer when they finish.
    pub fn evict_all(&self) {
        self.inner.generation.fetch_add(1, SeqCst);
        let mut state = self.inner.state.lock();
        state.artifacts.clear();
        state.progress = 0;
    }

    /// Snapshot of the buffer.
    #[must_use]
    pub fn info(&self) -> BufferInfo {
        let state = self.inner.state.lock();
        let mut buffered: Vec<&BufferedArtifact> = state.artifacts.values().collect();
        buffered.sort_by_key(|a| a.seq);

        BufferInfo {
            buffered_track_ids: buffered.iter().map(|a| a.track_id.clone()).collect(),
            total_buffered_secs: state.buffered_secs(),
            budget_secs: state.budget.budget_secs,
            is_buffering: !state.in_flight.is_empty(),
            progress: state.progress,
        }
    }
}

impl Inner {
    fn observer(&self) -> Arc<dyn BufferObserver> {
        Arc::clone(&self.observer.read())
    }

    async fn walk(self: Arc<Self>, generation: u64, tracks: Vec<Track>) {
        for track in &tracks {
            if self.generation.load(SeqCst) != generation {
                debug!("Look-ahead walk {generation} superseded");
                return;
            }

            let reservation = {
                let mut state = self.state.lock();
                let estimate = state.budget.estimate(track);
                state.reserve(&track.id, estimate, false)
            };

            match reservation {
                Reservation::Reserved => {
                    // Failures are reported to the observer and do not stop the walk.
                    let _ = self.buffer_one(track, false).await;
                }
                Reservation::AlreadyBuffered | Reservation::InFlight(_) => {}
                Reservation::OverBudget => {
                    debug!("Look-ahead budget reached before {}", track.id);
                    return;
                }
            }
        }
    }

    /// Current track already buffered: report it ready.
    fn report_ready(&self, track: &Track) {
        self.state.lock().progress = 100;
        let observer = self.observer();
        observer.on_progress(track, 100);
        observer.on_complete(track);
    }

    /// Waits for a load started elsewhere.
    ///
    /// Progress and completion reach the observer through the running load,
    /// which reports for whichever track is current.
    async fn join(
        &self,
        track: &Track,
        mut receiver: watch::Receiver<Option<LoadResult>>,
    ) -> LoadResult {
        debug!("Current track {} already loading, waiting for it", track.id);
        match receiver.wait_for(Option::is_some).await {
            Ok(result) => result.clone().unwrap_or(Err(BufferError::Interrupted)),
            Err(_) => Err(BufferError::Interrupted),
        }
    }

    /// Buffers one reserved track, releases its reservation and publishes the
    /// result to joined callers.
    async fn buffer_one(&self, track: &Track, foreground: bool) -> LoadResult {
        let mut guard = ReservationGuard {
            state: &self.state,
            track_id: &track.id,
            armed: true,
        };
        let observer = self.observer();
        let fetched = self.fetch(track, &observer).await;

        let mut state = self.state.lock();
        let done = state.in_flight.remove(&track.id).map(|load| load.done);
        guard.armed = false;
        let result = Self::store_fetched(&mut state, track, foreground, fetched);
        drop(state);

        match &result {
            Ok(true) => {
                debug!("Buffered {}", track.id);
                observer.on_complete(track);
            }
            Ok(false) => {}
            Err(e) => {
                match e {
                    BufferError::ResolutionError(ResolutionError::AllMirrorsUnavailable { .. }) => {
                        warn!("No mirror available for {}", track.id)
                    }
                    other => warn!("Buffering {} failed: {other}", track.id),
                }
                observer.on_error(track, e);
            }
        }

        let result = result.map(|_| ());
        if let Some(done) = done {
            done.send_replace(Some(result.clone()));
        }
        result
    }

    /// Inserts fetched media unless it would overflow the budget.
    ///
    /// Returns whether the track entered the buffer. Foreground loads and the
    /// current track are always kept.
    fn store_fetched(
        state: &mut BufferState,
        track: &Track,
        foreground: bool,
        fetched: Result<LoadedMedia, BufferError>,
    ) -> Result<bool, BufferError> {
        let media = fetched?;
        let duration_secs = media
            .duration_secs
            .or(track.duration_secs)
            .unwrap_or(state.budget.estimated_track_secs);
        let is_current = state.is_current(&track.id);

        if !foreground
            && !is_current
            && state.committed_secs() + duration_secs > state.budget.budget_secs
        {
            debug!(
                "Discarding {}: {:.0}s would exceed the {:.0}s budget",
                track.id, duration_secs, state.budget.budget_secs
            );
            return Ok(false);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let handle_id = state.next_handle_id;
        state.next_handle_id += 1;
        if is_current {
            state.progress = 100;
        }
        state.artifacts.insert(
            track.id.clone(),
            BufferedArtifact {
                track_id: track.id.clone(),
                handle: MediaHandle {
                    id: handle_id,
                    bytes: media.bytes,
                },
                buffered_at: Utc::now(),
                duration_secs,
                seq,
            },
        );
        debug!("{} takes {duration_secs:.0}s of the budget", track.id);
        Ok(true)
    }

    /// Records `percent` for `track` and forwards it when the track is current.
    fn report_progress(&self, track: &Track, percent: u8, observer: &Arc<dyn BufferObserver>) {
        {
            let mut state = self.state.lock();
            if !state.is_current(&track.id) {
                return;
            }
            state.progress = percent;
        }
        observer.on_progress(track, percent);
    }

    async fn fetch(
        &self,
        track: &Track,
        observer: &Arc<dyn BufferObserver>,
    ) -> Result<LoadedMedia, BufferError> {
        if let Some(media) = self.fetch_offline(track).await? {
            self.report_progress(track, 100, observer);
            return Ok(media);
        }

        let url = self.resolver.resolve(&track.id).await?;
        let progress = |percent: u8| self.report_progress(track, percent, observer);
        Ok(self.loader.load(&url, &progress).await?)
    }

    async fn fetch_offline(&self, track: &Track) -> Result<Option<LoadedMedia>, BufferError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let bytes = store
            .get(&track.id)
            .await
            .map_err(|e| BufferError::StoreError {
                reason: e.to_string(),
            })?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        debug!("Buffering {} from offline store", track.id);
        let probe_input = bytes.clone();
        let duration_secs = spawn_blocking(move || probe_duration(probe_input, None).ok())
            .await
            .ok()
            .flatten();

        Ok(Some(LoadedMedia {
            bytes,
            duration_secs,
        }))
    }
}
