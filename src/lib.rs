//! Offtrack - offline acquisition and look-ahead playback buffering
//!
//! Resolves streamable audio sources across redundant mirrors, downloads and
//! transcodes tracks for offline use, keeps a time-budgeted in-memory buffer of
//! upcoming tracks, and drives a playback queue state machine against an
//! external playback surface.

pub mod audio;
pub mod config;
pub mod error;
pub mod library;
pub mod state;

// Re-export key types for convenience
pub use {
    audio::{
        acquisition::{AcquisitionError, AcquisitionOutcome, AcquisitionPipeline},
        prebuffer::{BufferManager, BufferObserver, MediaHandle},
        queue_manager::{MediaControl, QueueManager, QueueManagerConfig},
        resolver::{ResolutionError, SourceResolver},
        surface::{PlaybackSurface, SurfaceSignal},
    },
    config::{SettingsManager, UserSettings},
    error::{Error, PlaybackError},
    library::{ArtifactMetadata, ArtifactStore, Track},
    state::{AppState, AppStateEvent, PlayerState, QueueStateMachine},
};
