//! Integration tests for queue management functionality.
//!
//! This module contains integration tests that verify queue manager behavior
//! including error recovery, forced play, session persistence and buffering.

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use {
        async_trait::async_trait,
        bytes::Bytes,
        parking_lot::Mutex,
        reqwest::Url,
        tokio::time::{Instant, sleep, timeout},
    };

    use crate::{
        audio::{
            loader::{LoadedMedia, LoaderError, MediaLoader},
            prebuffer::{BufferBudget, BufferManager, MediaHandle},
            queue_manager::{MediaControl, QueueManager, QueueManagerConfig},
            resolver::{MirrorProbe, ProbeError, SourceResolver},
            retry::RetryPolicy,
            surface::PlaybackSurface,
        },
        error::domain::PlaybackError,
        library::{
            models::Track,
            session::{PlayerSnapshot, SessionError, SessionStore},
        },
        state::{AppState, AppStateEvent, PlaybackQueue, PlayerState},
    };

    // Default timeout in milliseconds for test async operations
    const TEST_TIMEOUT_MS: u64 = 1000;

    const SKIP_DELAY: Duration = Duration::from_millis(50);

    #[derive(Debug, Clone, PartialEq)]
    enum Command {
        Load { id: String, buffered: bool },
        Play,
        Pause,
        Seek(f64),
        Stop,
    }

    #[derive(Default)]
    struct FakeSurface {
        commands: Mutex<Vec<Command>>,
    }

    impl FakeSurface {
        fn commands(&self) -> Vec<Command> {
            self.commands.lock().clone()
        }

        fn count(&self, command: &Command) -> usize {
            self.commands.lock().iter().filter(|c| *c == command).count()
        }

        fn loaded_ids(&self) -> Vec<String> {
            self.commands
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Command::Load { id, .. } => Some(id.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl PlaybackSurface for FakeSurface {
        fn load(&self, track: &Track, media: Option<MediaHandle>) -> Result<(), PlaybackError> {
            self.commands.lock().push(Command::Load {
                id: track.id.clone(),
                buffered: media.is_some(),
            });
            Ok(())
        }

        fn play(&self) -> Result<(), PlaybackError> {
            self.commands.lock().push(Command::Play);
            Ok(())
        }

        fn pause(&self) -> Result<(), PlaybackError> {
            self.commands.lock().push(Command::Pause);
            Ok(())
        }

        fn seek(&self, position_secs: f64) -> Result<(), PlaybackError> {
            self.commands.lock().push(Command::Seek(position_secs));
            Ok(())
        }

        fn stop(&self) -> Result<(), PlaybackError> {
            self.commands.lock().push(Command::Stop);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySession {
        recent: Mutex<Vec<Track>>,
        snapshot: Mutex<Option<PlayerSnapshot>>,
    }

    impl SessionStore for MemorySession {
        fn load_recent(&self) -> Result<Vec<Track>, SessionError> {
            Ok(self.recent.lock().clone())
        }

        fn save_recent(&self, tracks: &[Track]) -> Result<(), SessionError> {
            *self.recent.lock() = tracks.to_vec();
            Ok(())
        }

        fn load_snapshot(&self) -> Result<Option<PlayerSnapshot>, SessionError> {
            Ok(self.snapshot.lock().clone())
        }

        fn save_snapshot(&self, snapshot: &PlayerSnapshot) -> Result<(), SessionError> {
            *self.snapshot.lock() = Some(snapshot.clone());
            Ok(())
        }

        fn clear_snapshot(&self) -> Result<(), SessionError> {
            *self.snapshot.lock() = None;
            Ok(())
        }
    }

    struct AlwaysUp;

    #[async_trait]
    impl MirrorProbe for AlwaysUp {
        async fn probe(&self, _url: &Url, _timeout: Duration) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    /// Loader returning ten seconds of audio for any id.
    struct TenSecondLoader;

    #[async_trait]
    impl MediaLoader for TenSecondLoader {
        async fn load(
            &self,
            _url: &Url,
            progress: &(dyn Fn(u8) + Send + Sync),
        ) -> Result<LoadedMedia, LoaderError> {
            progress(100);
            Ok(LoadedMedia {
                bytes: Bytes::from_static(b"audio"),
                duration_secs: Some(10.0),
            })
        }
    }

    struct Harness {
        manager: QueueManager,
        surface: Arc<FakeSurface>,
        session: Arc<MemorySession>,
        app_state: Arc<AppState>,
    }

    fn create_test_tracks(count: usize) -> Vec<Track> {
        (0..count)
            .map(|i| Track::new(format!("t{i}"), format!("Track {i}")).with_duration(10.0))
            .collect()
    }

    fn test_config() -> QueueManagerConfig {
        QueueManagerConfig {
            buffer_enabled: false,
            recent_limit: 20,
            autoplay: true,
            error_skip_delay: SKIP_DELAY,
            force_play: RetryPolicy::fixed(1, Duration::from_millis(10)),
        }
    }

    fn harness_with(
        config: QueueManagerConfig,
        buffer: Option<BufferManager>,
        session: Arc<MemorySession>,
    ) -> Harness {
        let surface = Arc::new(FakeSurface::default());
        let app_state = Arc::new(AppState::new());
        let manager = QueueManager::new(
            surface.clone(),
            buffer,
            session.clone(),
            app_state.clone(),
            config,
        );
        Harness {
            manager,
            surface,
            session,
            app_state,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), None, Arc::new(MemorySession::default()))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    fn current_id(app_state: &AppState) -> Option<String> {
        app_state.get_current_track().map(|t| t.id)
    }

    #[test]
    fn test_playback_queue_default() {
        let queue = PlaybackQueue::default();
        assert!(queue.tracks.is_empty());
        assert!(queue.current_index.is_none());
    }

    #[tokio::test]
    async fn test_set_queue_loads_and_plays_first_track() {
        let h = harness();
        h.manager.set_queue(create_test_tracks(3));

        assert!(wait_until(|| h.surface.count(&Command::Play) >= 1).await);
        assert_eq!(
            h.surface.commands()[0],
            Command::Load {
                id: "t0".to_string(),
                buffered: false
            }
        );
        assert_eq!(current_id(&h.app_state).as_deref(), Some("t0"));
        assert_eq!(h.app_state.get_player_state(), PlayerState::Loading);
        assert_eq!(h.app_state.get_queue().tracks.len(), 3);

        h.manager.handle_state_code(1);
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Playing).await);
        assert_eq!(h.app_state.get_player_state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn test_error_skips_to_next_track() {
        let h = harness();
        let mut events = h.app_state.subscribe();

        h.manager.set_queue(create_test_tracks(3));
        h.manager.handle_state_code(1);
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Playing).await);

        let failed_at = Instant::now();
        h.manager.handle_error_code(150);
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Errored).await);

        assert!(
            wait_until(|| {
                h.manager.get_state() == PlayerState::Loading
                    && current_id(&h.app_state).as_deref() == Some("t1")
            })
            .await
        );
        assert!(failed_at.elapsed() >= SKIP_DELAY);
        assert_eq!(h.surface.loaded_ids(), vec!["t0", "t1"]);

        let mut notices = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AppStateEvent::ErrorNotice(message) = event {
                notices.push(message);
            }
        }
        assert_eq!(
            notices,
            vec!["This track cannot be played: playback not allowed by the owner"]
        );
    }

    #[tokio::test]
    async fn test_error_on_last_track_stays_errored() {
        let h = harness();
        h.manager.set_queue(create_test_tracks(1));
        h.manager.handle_state_code(1);
        h.manager.handle_error_code(100);

        assert!(wait_until(|| h.manager.get_state() == PlayerState::Errored).await);
        sleep(SKIP_DELAY * 3).await;

        assert_eq!(h.manager.get_state(), PlayerState::Errored);
        assert_eq!(h.surface.loaded_ids(), vec!["t0"]);
    }

    #[tokio::test]
    async fn test_user_navigation_cancels_pending_skip() {
        let h = harness();
        h.manager.set_queue(create_test_tracks(4));
        h.manager.handle_state_code(1);
        h.manager.handle_error_code(5);
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Errored).await);

        // Moves to t1 before the skip fires; the stale skip must not reach t2.
        h.manager.next_track();
        assert!(wait_until(|| h.surface.loaded_ids().len() == 2).await);
        sleep(SKIP_DELAY * 3).await;

        assert_eq!(h.surface.loaded_ids(), vec!["t0", "t1"]);
        assert_eq!(h.manager.get_queue().current_index, Some(1));
    }

    #[tokio::test]
    async fn test_force_play_retries_while_loading() {
        let config = QueueManagerConfig {
            force_play: RetryPolicy::fixed(3, Duration::from_millis(10)),
            ..test_config()
        };
        let h = harness_with(config, None, Arc::new(MemorySession::default()));
        h.manager.set_queue(create_test_tracks(1));

        assert!(wait_until(|| h.surface.count(&Command::Play) == 3).await);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.surface.count(&Command::Play), 3);
    }

    #[tokio::test]
    async fn test_force_play_stops_once_playing() {
        let config = QueueManagerConfig {
            force_play: RetryPolicy::fixed(10, Duration::from_millis(30)),
            ..test_config()
        };
        let h = harness_with(config, None, Arc::new(MemorySession::default()));
        h.manager.set_queue(create_test_tracks(1));
        h.manager.handle_state_code(1);

        assert!(wait_until(|| h.manager.get_state() == PlayerState::Playing).await);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(h.surface.count(&Command::Play), 1);
    }

    #[tokio::test]
    async fn test_navigation_bounds() {
        let h = harness();
        h.manager.set_queue(create_test_tracks(2));
        h.manager.previous_track();
        h.manager.next_track();
        h.manager.next_track();

        assert!(wait_until(|| h.surface.loaded_ids().len() == 2).await);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(h.surface.loaded_ids(), vec!["t0", "t1"]);

        h.manager.media_control(MediaControl::Previous);
        assert!(wait_until(|| h.surface.loaded_ids().len() == 3).await);
        assert_eq!(current_id(&h.app_state).as_deref(), Some("t0"));
    }

    #[tokio::test]
    async fn test_media_controls() {
        let h = harness();
        h.manager.set_queue(create_test_tracks(1));
        h.manager.handle_state_code(1);
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Playing).await);

        h.manager.media_control(MediaControl::Pause);
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Paused).await);
        assert_eq!(h.surface.count(&Command::Pause), 1);

        h.manager.media_control(MediaControl::Seek(42.0));
        assert!(wait_until(|| h.surface.count(&Command::Seek(42.0)) == 1).await);

        h.manager.toggle_play();
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Playing).await);
    }

    #[tokio::test]
    async fn test_removing_current_track_stops() {
        let h = harness();
        h.manager.set_queue(create_test_tracks(2));
        h.manager.remove_track("t0");

        assert!(wait_until(|| h.surface.count(&Command::Stop) == 1).await);
        assert_eq!(h.manager.get_state(), PlayerState::Idle);
        assert_eq!(h.app_state.get_queue().tracks.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_tracks_and_snapshot_persisted() {
        let h = harness();
        h.manager.set_queue(create_test_tracks(3));
        h.manager.next_track();

        assert!(wait_until(|| h.session.recent.lock().len() == 2).await);
        let recent: Vec<String> = h.manager.recent_tracks().into_iter().map(|t| t.id).collect();
        assert_eq!(recent, vec!["t1", "t0"]);

        let snapshot = h.session.snapshot.lock().clone();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.current_index, Some(1));
        assert_eq!(snapshot.track.map(|t| t.id).as_deref(), Some("t1"));
        assert_eq!(snapshot.queue.len(), 3);
    }

    #[tokio::test]
    async fn test_restore_session_waits_for_play() {
        let tracks = create_test_tracks(3);
        let session = Arc::new(MemorySession::default());
        *session.snapshot.lock() = Some(PlayerSnapshot {
            track: Some(tracks[2].clone()),
            queue: tracks,
            current_index: Some(2),
            is_playing: true,
            saved_at: String::new(),
        });
        let h = harness_with(test_config(), None, session);

        assert!(h.manager.restore_session());
        assert!(wait_until(|| h.manager.get_state() == PlayerState::Paused).await);
        assert_eq!(current_id(&h.app_state).as_deref(), Some("t2"));
        assert!(h.surface.commands().is_empty());

        h.manager.media_control(MediaControl::Play);
        assert!(wait_until(|| h.surface.loaded_ids() == vec!["t2"]).await);
    }

    #[tokio::test]
    async fn test_buffered_track_is_loaded_from_buffer() {
        let resolver = SourceResolver::new(
            vec!["https://mirror.test".to_string()],
            "140",
            Duration::from_secs(1),
            Arc::new(AlwaysUp),
        );
        let buffer = BufferManager::new(
            resolver,
            Arc::new(TenSecondLoader),
            BufferBudget {
                budget_secs: 100.0,
                estimated_track_secs: 10.0,
            },
        );
        let config = QueueManagerConfig {
            buffer_enabled: true,
            ..test_config()
        };
        let h = harness_with(
            config,
            Some(buffer.clone()),
            Arc::new(MemorySession::default()),
        );

        h.manager.set_queue(create_test_tracks(2));
        assert!(wait_until(|| buffer.is_buffered("t0") && buffer.is_buffered("t1")).await);
        assert!(wait_until(|| h.app_state.get_buffer_info().is_some()).await);

        h.manager.next_track();
        assert!(
            wait_until(|| h.surface.count(&Command::Load {
                id: "t1".to_string(),
                buffered: true
            }) == 1)
            .await
        );
    }
}
