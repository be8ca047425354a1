//! Playback queue manager driving the queue state machine.
//!
//! Commands, media controls and playback surface signals are serialized
//! through a single control loop. Each message is applied to the
//! `QueueStateMachine`, and the directives it returns are carried out against
//! the surface, the look-ahead buffer, the session store and the app state.

use std::{sync::Arc, time::Duration};

use {
    async_channel::{Receiver, Sender, unbounded},
    parking_lot::Mutex,
    tokio::{spawn, time::sleep},
    tracing::{debug, warn},
};

use crate::{
    audio::{
        prebuffer::BufferManager,
        retry::RetryPolicy,
        surface::{PlaybackSurface, SurfaceSignal},
    },
    config::UserSettings,
    error::{domain::PlaybackError, operational::ErrorReporter},
    library::{
        models::Track,
        session::{PlayerSnapshot, SessionStore, push_recent},
    },
    state::{
        AppState, BufferProgressForwarder,
        queue::{Directive, PlaybackQueue, PlayerState, QueueStateMachine},
    },
};

/// Transport controls from media keys or a system media session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaControl {
    Play,
    Pause,
    Next,
    Previous,
    Seek(f64),
}

/// Internal queue control messages.
enum QueueControlMessage {
    /// Play a track, optionally replacing the queue.
    PlayTrack {
        track: Track,
        tracks: Vec<Track>,
        index: Option<usize>,
    },
    /// Set a new queue.
    SetQueue(Vec<Track>),
    /// Navigate to next track.
    NextTrack,
    /// Navigate to previous track.
    PreviousTrack,
    /// Flip play/pause.
    TogglePlay,
    /// Seek within the current track.
    Seek(f64),
    /// Remove a track by id.
    RemoveTrack(String),
    /// Enable or disable autoplay.
    SetAutoplay(bool),
    /// Flip shuffle.
    ToggleShuffle,
    /// Media key or media session control.
    Media(MediaControl),
    /// Lifecycle signal from the playback surface.
    Signal(SurfaceSignal),
    /// Delayed skip after a playback error.
    SkipAfterError(u64),
    /// Restore a saved session.
    Restore(PlayerSnapshot),
}

/// Queue manager tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueManagerConfig {
    /// Whether upcoming tracks are buffered on every load.
    pub buffer_enabled: bool,
    /// Length of the recently played list.
    pub recent_limit: usize,
    /// Whether the queue advances at the end of a track.
    pub autoplay: bool,
    /// Delay before skipping past a failed track.
    pub error_skip_delay: Duration,
    /// Schedule of `play` re-issues while a load is pending.
    pub force_play: RetryPolicy,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self::from_settings(&UserSettings::default())
    }
}

impl QueueManagerConfig {
    /// Reads the queue manager tunables from user settings.
    #[must_use]
    pub fn from_settings(settings: &UserSettings) -> Self {
        Self {
            buffer_enabled: settings.buffer_enabled,
            recent_limit: settings.recent_tracks_limit,
            autoplay: settings.autoplay,
            error_skip_delay: settings.error_skip_delay(),
            force_play: RetryPolicy::fixed(
                settings.force_play_attempts,
                Duration::from_millis(settings.force_play_interval_ms),
            ),
        }
    }
}

/// Collaborators and shared state used by the control loop.
struct Driver {
    machine: Arc<Mutex<QueueStateMachine>>,
    surface: Arc<dyn PlaybackSurface>,
    buffer: Option<BufferManager>,
    session: Arc<dyn SessionStore>,
    app_state: Arc<AppState>,
    recent: Mutex<Vec<Track>>,
    config: QueueManagerConfig,
    control_tx: Sender<QueueControlMessage>,
}

/// Playback queue manager with auto-advance and error recovery.
///
/// The `QueueManager` owns the queue state machine, reacts to surface signals
/// and keeps the look-ahead buffer, session store and app state in step with
/// the current track. It must be created inside a Tokio runtime.
pub struct QueueManager {
    /// Queue state, shared with the control loop.
    machine: Arc<Mutex<QueueStateMachine>>,
    /// Collaborators of the control loop.
    driver: Arc<Driver>,
    /// Sender for internal control messages.
    control_tx: Sender<QueueControlMessage>,
}

impl QueueManager {
    /// Creates a new queue manager and starts its control loop.
    ///
    /// # Arguments
    ///
    /// * `surface` - Playback surface receiving commands.
    /// * `buffer` - Look-ahead buffer, or `None` to stream without buffering. Its
    ///   observer is replaced by one forwarding progress to `app_state`.
    /// * `session` - Store of the recently played list and player snapshot.
    /// * `app_state` - Application state reference for broadcasting changes.
    /// * `config` - Queue manager tunables.
    #[must_use]
    pub fn new(
        surface: Arc<dyn PlaybackSurface>,
        buffer: Option<BufferManager>,
        session: Arc<dyn SessionStore>,
        app_state: Arc<AppState>,
        config: QueueManagerConfig,
    ) -> Self {
        let (control_tx, control_rx) = unbounded();
        let machine = Arc::new(Mutex::new(QueueStateMachine::new(
            config.autoplay,
            config.error_skip_delay,
        )));

        if let Some(buffer) = &buffer {
            buffer.set_observer(Arc::new(BufferProgressForwarder::new(app_state.clone())));
        }

        let recent = session.load_recent().unwrap_or_else(|e| {
            warn!("QueueManager: Failed to load recent tracks: {e}");
            Vec::new()
        });

        let driver = Arc::new(Driver {
            machine: machine.clone(),
            surface,
            buffer,
            session,
            app_state,
            recent: Mutex::new(recent),
            config,
            control_tx: control_tx.clone(),
        });

        Self::start_control_loop(driver.clone(), control_rx);

        Self {
            machine,
            driver,
            control_tx,
        }
    }

    /// Plays `track`; see `QueueStateMachine::play_track`.
    pub fn play_track(&self, track: Track, tracks: Vec<Track>, index: Option<usize>) {
        self.send(
            QueueControlMessage::PlayTrack {
                track,
                tracks,
                index,
            },
            "PlayTrack",
        );
    }

    /// Sets a new playback queue and starts its first track.
    pub fn set_queue(&self, tracks: Vec<Track>) {
        self.send(QueueControlMessage::SetQueue(tracks), "SetQueue");
    }

    /// Navigates to the next track in the queue.
    pub fn next_track(&self) {
        self.send(QueueControlMessage::NextTrack, "NextTrack");
    }

    /// Navigates to the previous track in the queue.
    pub fn previous_track(&self) {
        self.send(QueueControlMessage::PreviousTrack, "PreviousTrack");
    }

    pub fn toggle_play(&self) {
        self.send(QueueControlMessage::TogglePlay, "TogglePlay");
    }

    pub fn seek(&self, position_secs: f64) {
        self.send(QueueControlMessage::Seek(position_secs), "Seek");
    }

    pub fn remove_track(&self, track_id: impl Into<String>) {
        self.send(QueueControlMessage::RemoveTrack(track_id.into()), "RemoveTrack");
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        self.send(QueueControlMessage::SetAutoplay(autoplay), "SetAutoplay");
    }

    pub fn toggle_shuffle(&self) {
        self.send(QueueControlMessage::ToggleShuffle, "ToggleShuffle");
    }

    /// Handles a media key or media session control.
    pub fn media_control(&self, control: MediaControl) {
        self.send(QueueControlMessage::Media(control), "Media");
    }

    /// Handles a lifecycle signal from the playback surface.
    pub fn handle_signal(&self, signal: SurfaceSignal) {
        self.send(QueueControlMessage::Signal(signal), "Signal");
    }

    /// Handles a numeric platform state code; unknown codes are ignored.
    pub fn handle_state_code(&self, code: i32) {
        match SurfaceSignal::from_state_code(code) {
            Some(signal) => self.handle_signal(signal),
            None => debug!("QueueManager: Ignoring unknown state code {code}"),
        }
    }

    /// Handles a numeric platform error code.
    pub fn handle_error_code(&self, code: i32) {
        self.handle_signal(SurfaceSignal::Error(code));
    }

    /// Restores the last saved session, paused.
    ///
    /// Returns whether a snapshot was found.
    pub fn restore_session(&self) -> bool {
        match self.driver.session.load_snapshot() {
            Ok(Some(snapshot)) => {
                self.send(QueueControlMessage::Restore(snapshot), "Restore");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("QueueManager: Failed to load player snapshot: {e}");
                false
            }
        }
    }

    /// Gets the current queue state.
    #[must_use]
    pub fn get_queue(&self) -> PlaybackQueue {
        self.machine.lock().queue().clone()
    }

    /// Gets the current player state.
    #[must_use]
    pub fn get_state(&self) -> PlayerState {
        self.machine.lock().state()
    }

    /// Gets the recently played tracks, most recent first.
    #[must_use]
    pub fn recent_tracks(&self) -> Vec<Track> {
        self.driver.recent.lock().clone()
    }

    fn send(&self, message: QueueControlMessage, name: &str) {
        if let Err(e) = self.control_tx.try_send(message) {
            debug!("QueueManager: Failed to send {name} message: {e}");
        }
    }

    /// Starts the control loop processing queue commands.
    fn start_control_loop(driver: Arc<Driver>, control_rx: Receiver<QueueControlMessage>) {
        spawn(async move {
            while let Ok(msg) = control_rx.recv().await {
                let directives = driver.apply(msg);
                driver.execute(directives);
            }
            debug!("QueueManager: Control loop stopped");
        });
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        self.control_tx.close();
    }
}

impl Driver {
    /// Applies a message to the state machine and publishes the new state.
    fn apply(&self, msg: QueueControlMessage) -> Vec<Directive> {
        let mut machine = self.machine.lock();
        let queue_before = machine.queue().clone();

        let directives = match msg {
            QueueControlMessage::PlayTrack {
                track,
                tracks,
                index,
            } => machine.play_track(track, tracks, index),
            QueueControlMessage::SetQueue(tracks) => {
                debug!(
                    "QueueManager: Setting new queue with {} tracks",
                    tracks.len()
                );
                machine.set_queue(tracks)
            }
            QueueControlMessage::NextTrack | QueueControlMessage::Media(MediaControl::Next) => {
                machine.next_track()
            }
            QueueControlMessage::PreviousTrack
            | QueueControlMessage::Media(MediaControl::Previous) => machine.previous_track(),
            QueueControlMessage::TogglePlay => machine.toggle_play(),
            QueueControlMessage::Media(MediaControl::Play) => machine.set_playing(true),
            QueueControlMessage::Media(MediaControl::Pause) => machine.set_playing(false),
            QueueControlMessage::Seek(position)
            | QueueControlMessage::Media(MediaControl::Seek(position)) => {
                machine.seek(position).unwrap_or_else(|e| {
                    debug!("QueueManager: Seek rejected: {e}");
                    Vec::new()
                })
            }
            QueueControlMessage::RemoveTrack(track_id) => machine.remove_track(&track_id),
            QueueControlMessage::SetAutoplay(autoplay) => {
                machine.set_autoplay(autoplay);
                Vec::new()
            }
            QueueControlMessage::ToggleShuffle => {
                let shuffled = machine.toggle_shuffle();
                debug!("QueueManager: Shuffle {}", if shuffled { "on" } else { "off" });
                Vec::new()
            }
            QueueControlMessage::Signal(signal) => machine.handle_signal(signal),
            QueueControlMessage::SkipAfterError(token) => machine.skip_after_error(token),
            QueueControlMessage::Restore(snapshot) => {
                machine.restore(snapshot);
                self.app_state
                    .update_current_track(machine.current_track().cloned());
                Vec::new()
            }
        };

        self.app_state.update_player_state(machine.state());
        if *machine.queue() != queue_before {
            self.app_state.update_queue(machine.queue().clone());
        }

        directives
    }

    /// Carries out directives in order.
    fn execute(self: &Arc<Self>, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::Load { track, token, .. } => self.load_track(track, token),
                Directive::Play => self.surface_command("play", self.surface.play()),
                Directive::Pause => self.surface_command("pause", self.surface.pause()),
                Directive::Seek(position) => {
                    self.surface_command("seek", self.surface.seek(position));
                }
                Directive::Stop => self.surface_command("stop", self.surface.stop()),
                Directive::ScheduleSkip { delay, token } => {
                    let control_tx = self.control_tx.clone();
                    spawn(async move {
                        sleep(delay).await;
                        if let Err(e) = control_tx
                            .send(QueueControlMessage::SkipAfterError(token))
                            .await
                        {
                            debug!("QueueManager: Failed to send SkipAfterError message: {e}");
                        }
                    });
                }
                Directive::Notify(error) => {
                    warn!("QueueManager: Playback failed: {error}");
                    self.app_state
                        .notify_error(ErrorReporter::playback_message(&error));
                }
            }
        }
    }

    /// Hands a track to the surface and updates everything tied to the current track.
    fn load_track(self: &Arc<Self>, track: Track, token: u64) {
        self.app_state.update_current_track(Some(track.clone()));

        {
            let mut recent = self.recent.lock();
            push_recent(&mut recent, &track, self.config.recent_limit);
            if let Err(e) = self.session.save_recent(&recent) {
                warn!("QueueManager: Failed to save recent tracks: {e}");
            }
        }

        let (snapshot, queue) = {
            let machine = self.machine.lock();
            (machine.snapshot(), machine.queue().tracks.clone())
        };
        if let Err(e) = self.session.save_snapshot(&snapshot) {
            warn!("QueueManager: Failed to save player snapshot: {e}");
        }

        let media = match &self.buffer {
            Some(buffer) => {
                let media = buffer.get_buffered(&track.id);
                if self.config.buffer_enabled {
                    self.start_buffering(buffer.clone(), track.clone(), queue);
                }
                media
            }
            None => None,
        };

        debug!(
            "QueueManager: Loading {} ({})",
            track.id,
            if media.is_some() { "buffered" } else { "streamed" }
        );
        if let Err(e) = self.surface.load(&track, media) {
            self.surface_command("load", Err(e));
            return;
        }
        self.surface_command("play", self.surface.play());
        self.start_force_play(token);
    }

    fn start_buffering(&self, buffer: BufferManager, track: Track, queue: Vec<Track>) {
        let app_state = self.app_state.clone();
        spawn(async move {
            let look_ahead = buffer.ensure_buffered(&track, &queue).await;
            if let Err(e) = &look_ahead.foreground {
                warn!("QueueManager: Failed to buffer {}: {e}", track.id);
            }
            look_ahead.finished().await;
            app_state.update_buffer_info(buffer.info());
        });
    }

    /// Re-issues `play` while load `token` is still pending.
    fn start_force_play(self: &Arc<Self>, token: u64) {
        let driver = Arc::clone(self);
        spawn(async move {
            let mut attempt = 1;
            while let Some(delay) = driver.config.force_play.next_delay(attempt) {
                sleep(delay).await;
                {
                    let machine = driver.machine.lock();
                    if machine.load_token() != token || machine.state() != PlayerState::Loading {
                        return;
                    }
                }
                debug!("QueueManager: Forcing play for load {token}, attempt {attempt}");
                driver.surface_command("play", driver.surface.play());
                attempt += 1;
            }
        });
    }

    fn surface_command(&self, name: &str, result: Result<(), PlaybackError>) {
        if let Err(e) = result {
            warn!("QueueManager: Surface {name} failed: {e}");
            self.app_state
                .notify_error(ErrorReporter::playback_message(&e));
        }
    }
}
