//! Shared application state with reactive update notifications.
//!
//! `AppState` mirrors what the player is doing for anything that displays it.
//! Updates go through the `update_*` methods, which notify subscribers over a
//! broadcast channel.

use std::{mem::replace, sync::Arc};

use {
    parking_lot::RwLock,
    tokio::sync::broadcast::{Receiver, Sender, channel},
};

use crate::{
    audio::prebuffer::{BufferInfo, BufferObserver},
    library::models::Track,
    state::queue::{PlaybackQueue, PlayerState},
};

/// Central state container with thread-safe access.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Current player state.
    pub player: Arc<RwLock<PlayerState>>,
    /// Currently loaded track.
    pub current_track: Arc<RwLock<Option<Track>>>,
    /// Current queue.
    pub queue: Arc<RwLock<PlaybackQueue>>,
    /// Last reported look-ahead buffer status.
    pub buffer: Arc<RwLock<Option<BufferInfo>>>,
    /// Broadcast channel for state change notifications.
    state_tx: Sender<AppStateEvent>,
}

/// Application state change events.
#[derive(Debug, Clone)]
pub enum AppStateEvent {
    /// Player state changed.
    PlayerStateChanged(PlayerState),
    /// Current track changed.
    CurrentTrackChanged(Option<Track>),
    /// Queue contents or position changed.
    QueueChanged(PlaybackQueue),
    /// A failure the user should be told about.
    ErrorNotice(String),
    /// Download progress of the track being buffered for playback.
    BufferProgress { track_id: String, percent: u8 },
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Creates an idle application state.
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = channel(16);

        Self {
            player: Arc::new(RwLock::new(PlayerState::Idle)),
            current_track: Arc::new(RwLock::new(None)),
            queue: Arc::new(RwLock::new(PlaybackQueue::default())),
            buffer: Arc::new(RwLock::new(None)),
            state_tx,
        }
    }

    /// Updates the player state and notifies subscribers if it changed.
    pub fn update_player_state(&self, state: PlayerState) {
        let previous = replace(&mut *self.player.write(), state);
        if previous != state {
            let _ = self.state_tx.send(AppStateEvent::PlayerStateChanged(state));
        }
    }

    /// Updates the current track and notifies subscribers.
    pub fn update_current_track(&self, track: Option<Track>) {
        *self.current_track.write() = track.clone();
        let _ = self
            .state_tx
            .send(AppStateEvent::CurrentTrackChanged(track));
    }

    /// Updates the queue and notifies subscribers.
    pub fn update_queue(&self, queue: PlaybackQueue) {
        *self.queue.write() = queue.clone();
        let _ = self.state_tx.send(AppStateEvent::QueueChanged(queue));
    }

    /// Records the latest look-ahead buffer status.
    pub fn update_buffer_info(&self, info: BufferInfo) {
        *self.buffer.write() = Some(info);
    }

    /// Sends an error notice to subscribers.
    pub fn notify_error(&self, message: impl Into<String>) {
        let _ = self
            .state_tx
            .send(AppStateEvent::ErrorNotice(message.into()));
    }

    /// Subscribes to application state changes.
    pub fn subscribe(&self) -> Receiver<AppStateEvent> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn get_player_state(&self) -> PlayerState {
        *self.player.read()
    }

    #[must_use]
    pub fn get_current_track(&self) -> Option<Track> {
        self.current_track.read().clone()
    }

    #[must_use]
    pub fn get_queue(&self) -> PlaybackQueue {
        self.queue.read().clone()
    }

    #[must_use]
    pub fn get_buffer_info(&self) -> Option<BufferInfo> {
        self.buffer.read().clone()
    }
}

/// Forwards look-ahead buffer progress to the application state.
pub struct BufferProgressForwarder {
    app_state: Arc<AppState>,
}

impl BufferProgressForwarder {
    #[must_use]
    pub fn new(app_state: Arc<AppState>) -> Self {
        Self { app_state }
    }
}

impl BufferObserver for BufferProgressForwarder {
    fn on_progress(&self, track: &Track, percent: u8) {
        let _ = self.app_state.state_tx.send(AppStateEvent::BufferProgress {
            track_id: track.id.clone(),
            percent,
        });
    }
}
