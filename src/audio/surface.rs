//! Boundary with the external playback surface.
//!
//! The surface renders audio and reports lifecycle changes as numeric platform
//! codes. Codes are mapped once, here, into `SurfaceSignal`; everything past
//! this module works with the closed enum.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::{audio::prebuffer::MediaHandle, error::domain::PlaybackError, library::models::Track};

/// Lifecycle signal emitted by the playback surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceSignal {
    /// Loaded but not started (`-1`).
    Unstarted,
    /// The surface finished initializing.
    Ready,
    /// Playback is running (`1`).
    Playing,
    /// Playback is paused (`2`).
    Paused,
    /// Waiting for data (`3`).
    Buffering,
    /// The track played to its end (`0`).
    Ended,
    /// A track is cued without playing (`5`).
    Cued,
    /// The surface failed with a platform error code.
    Error(i32),
}

impl SurfaceSignal {
    /// Maps a numeric platform state code; unknown codes yield `None`.
    #[must_use]
    pub fn from_state_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(SurfaceSignal::Unstarted),
            0 => Some(SurfaceSignal::Ended),
            1 => Some(SurfaceSignal::Playing),
            2 => Some(SurfaceSignal::Paused),
            3 => Some(SurfaceSignal::Buffering),
            5 => Some(SurfaceSignal::Cued),
            _ => None,
        }
    }
}

/// Classification of platform error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceErrorKind {
    /// `2`: the request carried an invalid parameter.
    InvalidParameter,
    /// `5`: the renderer could not play the content.
    RendererFailure,
    /// `100`: the content was removed or made private.
    NotFound,
    /// `101`, `150`: the owner does not allow embedded playback.
    EmbeddingForbidden,
    /// Any other code.
    Unknown,
}

impl SurfaceErrorKind {
    /// Classifies a platform error code.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => SurfaceErrorKind::InvalidParameter,
            5 => SurfaceErrorKind::RendererFailure,
            100 => SurfaceErrorKind::NotFound,
            101 | 150 => SurfaceErrorKind::EmbeddingForbidden,
            _ => SurfaceErrorKind::Unknown,
        }
    }
}

impl Display for SurfaceErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let text = match self {
            SurfaceErrorKind::InvalidParameter => "invalid request parameter",
            SurfaceErrorKind::RendererFailure => "renderer failure",
            SurfaceErrorKind::NotFound => "content not found",
            SurfaceErrorKind::EmbeddingForbidden => "playback not allowed by the owner",
            SurfaceErrorKind::Unknown => "unknown error",
        };
        f.write_str(text)
    }
}

/// Commands accepted by the playback surface.
///
/// Commands only start work; outcomes come back as `SurfaceSignal`s.
pub trait PlaybackSurface: Send + Sync {
    /// Loads `track`, from `media` when it is buffered locally.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Surface` if the surface rejects the command.
    fn load(&self, track: &Track, media: Option<MediaHandle>) -> Result<(), PlaybackError>;

    /// Starts or resumes playback.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Surface` if the surface rejects the command.
    fn play(&self) -> Result<(), PlaybackError>;

    /// Pauses playback.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Surface` if the surface rejects the command.
    fn pause(&self) -> Result<(), PlaybackError>;

    /// Seeks to `position_secs`.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Surface` if the surface rejects the command.
    fn seek(&self, position_secs: f64) -> Result<(), PlaybackError>;

    /// Stops playback and unloads the current track.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Surface` if the surface rejects the command.
    fn stop(&self) -> Result<(), PlaybackError>;
}
