//! Playback queue state machine.
//!
//! `QueueStateMachine` owns the queue and the player state and never performs
//! side effects. Every mutating call returns the `Directive`s the caller must
//! carry out, in order, against the playback surface and the rest of the
//! application.

use std::time::Duration;

use {
    chrono::Utc,
    rand::{rng, seq::SliceRandom},
    tracing::debug,
};

use crate::{
    audio::surface::SurfaceSignal,
    error::domain::PlaybackError,
    library::{models::Track, session::PlayerSnapshot},
};

/// Default delay before skipping past a track that failed to play.
pub const DEFAULT_ERROR_SKIP_DELAY: Duration = Duration::from_secs(2);

/// Player lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    /// Nothing is loaded or playback was stopped.
    #[default]
    Idle,
    /// A track was handed to the surface and has not started yet.
    Loading,
    /// Audio is playing.
    Playing,
    /// Playback is paused.
    Paused,
    /// The surface is waiting for data mid-track.
    Buffering,
    /// The current track played to its end.
    Ended,
    /// The surface reported an error for the current track.
    Errored,
}

impl PlayerState {
    /// Whether the player is playing or about to.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlayerState::Loading | PlayerState::Playing | PlayerState::Buffering
        )
    }
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Load `track`, found at `index` in the queue, and start it.
    ///
    /// `token` identifies this load; later loads carry larger tokens.
    Load {
        track: Track,
        index: usize,
        token: u64,
    },
    /// Start or resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Seek to a position in seconds.
    Seek(f64),
    /// Stop playback.
    Stop,
    /// Call `skip_after_error(token)` once `delay` has elapsed.
    ScheduleSkip { delay: Duration, token: u64 },
    /// Tell the user about a failure.
    Notify(PlaybackError),
}

/// Ordered list of tracks and the position of the current one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackQueue {
    /// Tracks in play order.
    pub tracks: Vec<Track>,
    /// Index of the current track.
    pub current_index: Option<usize>,
}

impl PlaybackQueue {
    /// The current track.
    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    /// Whether a track follows the current one.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.current_index
            .is_some_and(|i| i + 1 < self.tracks.len())
    }

    /// Whether a track precedes the current one.
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.current_index.is_some_and(|i| i > 0)
    }

    /// Tracks after the current one, or the whole queue when nothing is current.
    #[must_use]
    pub fn upcoming(&self) -> &[Track] {
        match self.current_index {
            Some(i) => self.tracks.get(i + 1..).unwrap_or(&[]),
            None => &self.tracks,
        }
    }

    fn position(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }
}

/// Queue and player state with pure transitions.
#[derive(Debug, Clone)]
pub struct QueueStateMachine {
    queue: PlaybackQueue,
    state: PlayerState,
    autoplay: bool,
    /// Queue order before shuffling; `Some` while shuffle is on.
    unshuffled: Option<Vec<Track>>,
    load_token: u64,
    error_skip_delay: Duration,
    /// Restored from a snapshot; the surface has not loaded the track yet.
    restored: bool,
}

impl Default for QueueStateMachine {
    fn default() -> Self {
        Self::new(false, DEFAULT_ERROR_SKIP_DELAY)
    }
}

impl QueueStateMachine {
    /// Creates an idle state machine with an empty queue.
    #[must_use]
    pub fn new(autoplay: bool, error_skip_delay: Duration) -> Self {
        Self {
            queue: PlaybackQueue::default(),
            state: PlayerState::Idle,
            autoplay,
            unshuffled: None,
            load_token: 0,
            error_skip_delay,
            restored: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> PlayerState {
        self.state
    }

    #[must_use]
    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    #[must_use]
    pub fn current_track(&self) -> Option<&Track> {
        self.queue.current()
    }

    /// Token of the most recent load.
    #[must_use]
    pub fn load_token(&self) -> u64 {
        self.load_token
    }

    #[must_use]
    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    #[must_use]
    pub fn is_shuffled(&self) -> bool {
        self.unshuffled.is_some()
    }

    /// Plays `track`.
    ///
    /// The current track is resumed rather than reloaded. A non-empty `tracks`
    /// replaces the queue; `index` points at `track` within it and is clamped,
    /// falling back to the track's own position, or appending it when absent.
    /// An empty `tracks` keeps the queue and points at `track`, appending it if
    /// it is not queued.
    pub fn play_track(
        &mut self,
        track: Track,
        tracks: Vec<Track>,
        index: Option<usize>,
    ) -> Vec<Directive> {
        let is_current = self.current_track().is_some_and(|t| t.id == track.id);
        if is_current && !self.restored {
            match self.state {
                PlayerState::Paused => {
                    self.state = PlayerState::Playing;
                    return vec![Directive::Play];
                }
                PlayerState::Playing | PlayerState::Loading | PlayerState::Buffering => {
                    return vec![Directive::Play];
                }
                PlayerState::Idle | PlayerState::Ended | PlayerState::Errored => {}
            }
        }

        let target = if tracks.is_empty() {
            self.queue.position(&track.id).unwrap_or_else(|| {
                self.push_track(track);
                self.queue.tracks.len() - 1
            })
        } else {
            let clamped = index.map(|i| i.min(tracks.len() - 1));
            self.replace_tracks(tracks);
            match clamped {
                Some(i) if self.queue.tracks[i].id == track.id => i,
                _ => self.queue.position(&track.id).unwrap_or_else(|| {
                    self.push_track(track);
                    self.queue.tracks.len() - 1
                }),
            }
        };

        let directives = self.load_at(target);
        self.shuffle_upcoming();
        directives
    }

    /// Replaces the queue and loads its first entry.
    pub fn set_queue(&mut self, tracks: Vec<Track>) -> Vec<Directive> {
        if tracks.is_empty() {
            self.queue = PlaybackQueue::default();
            if self.unshuffled.is_some() {
                self.unshuffled = Some(Vec::new());
            }
            self.restored = false;
            self.state = PlayerState::Idle;
            return vec![Directive::Stop];
        }

        self.replace_tracks(tracks);
        let directives = self.load_at(0);
        self.shuffle_upcoming();
        directives
    }

    /// Applies a lifecycle signal from the playback surface.
    pub fn handle_signal(&mut self, signal: SurfaceSignal) -> Vec<Directive> {
        if self.state == PlayerState::Idle {
            debug!("Queue: Ignoring {:?} while idle", signal);
            return Vec::new();
        }

        match signal {
            SurfaceSignal::Playing => {
                if matches!(
                    self.state,
                    PlayerState::Loading | PlayerState::Buffering | PlayerState::Paused
                ) {
                    self.state = PlayerState::Playing;
                }
                Vec::new()
            }
            SurfaceSignal::Paused => {
                if matches!(
                    self.state,
                    PlayerState::Loading | PlayerState::Playing | PlayerState::Buffering
                ) {
                    self.state = PlayerState::Paused;
                }
                Vec::new()
            }
            SurfaceSignal::Buffering => {
                if matches!(self.state, PlayerState::Playing | PlayerState::Paused) {
                    self.state = PlayerState::Buffering;
                }
                Vec::new()
            }
            SurfaceSignal::Ended => {
                if !matches!(self.state, PlayerState::Playing | PlayerState::Buffering) {
                    debug!("Queue: Ignoring end of track while {:?}", self.state);
                    return Vec::new();
                }
                self.state = PlayerState::Ended;
                if self.autoplay && self.queue.has_next() {
                    self.advance()
                } else {
                    self.state = PlayerState::Idle;
                    vec![Directive::Stop]
                }
            }
            SurfaceSignal::Error(code) => {
                if self.state == PlayerState::Errored {
                    debug!("Queue: Ignoring repeated error {code}");
                    return Vec::new();
                }
                self.state = PlayerState::Errored;
                let mut directives = vec![Directive::Notify(PlaybackError::from_surface_code(
                    code,
                ))];
                if self.queue.has_next() {
                    directives.push(Directive::ScheduleSkip {
                        delay: self.error_skip_delay,
                        token: self.load_token,
                    });
                }
                directives
            }
            SurfaceSignal::Unstarted | SurfaceSignal::Cued | SurfaceSignal::Ready => Vec::new(),
        }
    }

    /// Moves past a failed track if the failure is still current.
    pub fn skip_after_error(&mut self, token: u64) -> Vec<Directive> {
        if self.state != PlayerState::Errored || token != self.load_token {
            debug!("Queue: Ignoring stale skip for load {token}");
            return Vec::new();
        }
        if !self.queue.has_next() {
            return Vec::new();
        }
        self.advance()
    }

    /// Loads the next track; no-op at the end of the queue.
    pub fn next_track(&mut self) -> Vec<Directive> {
        if !self.queue.has_next() {
            debug!("Queue: At end of queue, no next track");
            return Vec::new();
        }
        self.advance()
    }

    /// Loads the previous track; no-op at the start of the queue.
    pub fn previous_track(&mut self) -> Vec<Directive> {
        match self.queue.current_index {
            Some(i) if i > 0 => self.load_at(i - 1),
            _ => {
                debug!("Queue: At beginning of queue, no previous track");
                Vec::new()
            }
        }
    }

    /// Flips between playing and paused.
    pub fn toggle_play(&mut self) -> Vec<Directive> {
        let playing = self.state.is_active() && !self.restored;
        self.set_playing(!playing)
    }

    /// Requests playback to run or pause.
    pub fn set_playing(&mut self, playing: bool) -> Vec<Directive> {
        if playing {
            match self.state {
                PlayerState::Paused if !self.restored => {
                    self.state = PlayerState::Playing;
                    vec![Directive::Play]
                }
                PlayerState::Paused
                | PlayerState::Idle
                | PlayerState::Ended
                | PlayerState::Errored => match self.queue.current_index {
                    Some(i) if i < self.queue.tracks.len() => self.load_at(i),
                    _ => Vec::new(),
                },
                PlayerState::Loading | PlayerState::Playing | PlayerState::Buffering => {
                    Vec::new()
                }
            }
        } else if self.state.is_active() {
            self.state = PlayerState::Paused;
            vec![Directive::Pause]
        } else {
            Vec::new()
        }
    }

    /// Seeks within the current track.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::InvalidOperation` when nothing is loaded or the
    /// position is negative or not finite.
    pub fn seek(&mut self, position_secs: f64) -> Result<Vec<Directive>, PlaybackError> {
        if self.state == PlayerState::Idle || self.restored {
            return Err(PlaybackError::InvalidOperation {
                reason: "Cannot seek while idle".to_string(),
            });
        }
        if !position_secs.is_finite() || position_secs < 0.0 {
            return Err(PlaybackError::InvalidOperation {
                reason: format!("Invalid seek position {position_secs}"),
            });
        }
        Ok(vec![Directive::Seek(position_secs)])
    }

    /// Removes a track from the queue.
    ///
    /// Removing the current track stops playback.
    pub fn remove_track(&mut self, track_id: &str) -> Vec<Directive> {
        let Some(position) = self.queue.position(track_id) else {
            return Vec::new();
        };
        self.queue.tracks.remove(position);
        if let Some(unshuffled) = &mut self.unshuffled {
            unshuffled.retain(|t| t.id != track_id);
        }

        let len = self.queue.tracks.len();
        match self.queue.current_index {
            Some(current) if current == position => {
                self.queue.current_index = (len > 0).then(|| position.min(len - 1));
                self.state = PlayerState::Idle;
                self.restored = false;
                vec![Directive::Stop]
            }
            Some(current) if position < current => {
                self.queue.current_index = Some(current - 1);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    /// Turns shuffle on or off.
    ///
    /// Only tracks after the current one are shuffled. Turning shuffle off
    /// restores the original order and keeps the current track current.
    pub fn toggle_shuffle(&mut self) -> bool {
        match self.unshuffled.take() {
            Some(original) => {
                let current_id = self.current_track().map(|t| t.id.clone());
                self.queue.tracks = original;
                if let Some(id) = current_id {
                    self.queue.current_index = self.queue.position(&id);
                }
                false
            }
            None => {
                self.unshuffled = Some(self.queue.tracks.clone());
                self.shuffle_upcoming();
                true
            }
        }
    }

    /// Captures the resumable state.
    #[must_use]
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            track: self.current_track().cloned(),
            queue: self.queue.tracks.clone(),
            current_index: self.queue.current_index,
            is_playing: self.state.is_active() && !self.restored,
            saved_at: Utc::now().to_rfc3339(),
        }
    }

    /// Restores a snapshot without starting playback.
    ///
    /// The restored track is loaded on the next request to play.
    pub fn restore(&mut self, snapshot: PlayerSnapshot) {
        self.queue.tracks = snapshot.queue;
        self.unshuffled = None;
        let index = snapshot
            .current_index
            .filter(|i| {
                snapshot.track.as_ref().is_none_or(|track| {
                    self.queue.tracks.get(*i).is_some_and(|t| t.id == track.id)
                })
            })
            .or_else(|| {
                snapshot
                    .track
                    .as_ref()
                    .and_then(|track| self.queue.position(&track.id))
            });
        self.queue.current_index = index
            .filter(|i| *i < self.queue.tracks.len())
            .or_else(|| (!self.queue.tracks.is_empty()).then_some(0));

        if self.queue.current_index.is_some() {
            self.state = PlayerState::Paused;
            self.restored = true;
        } else {
            self.state = PlayerState::Idle;
            self.restored = false;
        }
    }

    fn advance(&mut self) -> Vec<Directive> {
        match self.queue.current_index {
            Some(i) if i + 1 < self.queue.tracks.len() => self.load_at(i + 1),
            _ => Vec::new(),
        }
    }

    fn load_at(&mut self, index: usize) -> Vec<Directive> {
        let Some(track) = self.queue.tracks.get(index).cloned() else {
            return Vec::new();
        };
        self.queue.current_index = Some(index);
        self.state = PlayerState::Loading;
        self.restored = false;
        self.load_token += 1;
        debug!("Queue: Loading {} at index {index}", track.id);
        vec![Directive::Load {
            track,
            index,
            token: self.load_token,
        }]
    }

    fn replace_tracks(&mut self, tracks: Vec<Track>) {
        if self.unshuffled.is_some() {
            self.unshuffled = Some(tracks.clone());
        }
        self.queue.tracks = tracks;
        self.queue.current_index = None;
    }

    fn push_track(&mut self, track: Track) {
        if let Some(unshuffled) = &mut self.unshuffled {
            unshuffled.push(track.clone());
        }
        self.queue.tracks.push(track);
    }

    fn shuffle_upcoming(&mut self) {
        if self.unshuffled.is_none() {
            return;
        }
        let start = self.queue.current_index.map_or(0, |i| i + 1);
        if let Some(upcoming) = self.queue.tracks.get_mut(start..) {
            upcoming.shuffle(&mut rng());
        }
    }
}
