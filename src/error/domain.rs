//! Domain-specific error types using `thiserror`.
//!
//! Component errors live next to their components. This module defines the
//! playback errors shared by the queue state machine and the surface boundary,
//! and the crate-wide `Error` aggregating every component error.

use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::{
    audio::{
        acquisition::AcquisitionError, backend::BackendError, decoder::DecoderError,
        prebuffer::BufferError, resampler::ResamplingError, resolver::ResolutionError,
        surface::SurfaceErrorKind, transcoder::TranscodeError,
    },
    config::settings::SettingsError,
    library::{schema::SchemaError, session::SessionError, store::StoreError},
};

/// Playback-related errors.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// The playback surface reported an error code.
    #[error("Playback surface error {code}: {kind}")]
    PlaybackSurfaceError { code: i32, kind: SurfaceErrorKind },
    /// Invalid operation for current state.
    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },
    /// The playback surface rejected a command.
    #[error("Surface command failed: {reason}")]
    Surface { reason: String },
}

impl PlaybackError {
    /// Error for a platform error code.
    #[must_use]
    pub fn from_surface_code(code: i32) -> Self {
        PlaybackError::PlaybackSurfaceError {
            code,
            kind: SurfaceErrorKind::from_code(code),
        }
    }
}

/// Any error produced by the crate.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Source resolution error.
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),
    /// Conversion backend error.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    /// Decoder error.
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),
    /// Resampling error.
    #[error("Resampling error: {0}")]
    Resampling(#[from] ResamplingError),
    /// Transcoding error.
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),
    /// Acquisition error.
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),
    /// Look-ahead buffer error.
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
    /// Artifact store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// Database schema error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    /// Session persistence error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    /// Settings error.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
    /// Playback error.
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),
}

/// Operational error context propagation with `anyhow`.
///
/// This type is used for operational errors that need rich context
/// but don't require specific handling logic.
pub type Result<T> = StdResult<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use crate::{
        audio::{resolver::ResolutionError, surface::SurfaceErrorKind},
        error::domain::{Error, PlaybackError},
    };

    #[test]
    fn test_playback_error_display() {
        let error = PlaybackError::from_surface_code(150);
        assert_eq!(
            error,
            PlaybackError::PlaybackSurfaceError {
                code: 150,
                kind: SurfaceErrorKind::EmbeddingForbidden
            }
        );
        assert_eq!(
            error.to_string(),
            "Playback surface error 150: playback not allowed by the owner"
        );

        let invalid_op_error = PlaybackError::InvalidOperation {
            reason: "test reason".to_string(),
        };
        assert_eq!(
            invalid_op_error.to_string(),
            "Invalid operation: test reason"
        );
    }

    #[test]
    fn test_crate_error_wraps_components() {
        let error: Error = ResolutionError::AllMirrorsUnavailable { attempted: 4 }.into();
        assert_eq!(
            error.to_string(),
            "Resolution error: All 4 mirrors are unavailable"
        );
    }
}
