//! Operational error context propagation with `anyhow`.
//!
//! This module provides extension traits and utilities for enhancing
//! error context and centralized error reporting.

use std::{error::Error as StdError, fmt::Display};

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::{debug, error, info, warn},
};

use crate::{
    audio::{
        acquisition::AcquisitionError, prebuffer::BufferError, resolver::ResolutionError,
    },
    error::domain::{Error as DomainError, PlaybackError},
};

/// Extension trait for enhanced error context.
pub trait ResultExt<T, E> {
    /// Adds context to an error with a static string.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;

    /// Adds context to an error with a formatted string.
    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(context)
    }

    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(format.to_string())
    }
}

/// Centralized error reporting and logging.
///
/// The `ErrorReporter` provides a consistent interface for logging
/// errors at different severity levels and turning them into notices for users.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Reports a debug-level error (development only).
    pub fn debug(error: &Error, context: &str) {
        debug!(context = context, error = %error, "Debug error");
    }

    /// Reports an info-level error (user actions and system events).
    pub fn info(error: &Error, context: &str) {
        info!(context = context, error = %error, "Info error");
    }

    /// Reports a warning-level error (recoverable issues).
    pub fn warn(error: &Error, context: &str) {
        warn!(context = context, error = %error, "Warning error");
    }

    /// Reports an error-level error (non-recoverable issues).
    pub fn error(error: &Error, context: &str) {
        error!(context = context, error = %error, "Error error");
    }

    /// Converts an error to a user-friendly message.
    ///
    /// Known crate errors anywhere in the chain get a tailored message; anything
    /// else falls back to the top-level error text.
    pub fn to_user_message(error: &Error) -> String {
        for cause in error.chain() {
            if let Some(playback) = cause.downcast_ref::<PlaybackError>() {
                return Self::playback_message(playback);
            }
            if let Some(acquisition) = cause.downcast_ref::<AcquisitionError>() {
                return Self::acquisition_message(acquisition);
            }
            if let Some(DomainError::Playback(playback)) = cause.downcast_ref::<DomainError>() {
                return Self::playback_message(playback);
            }
            if let Some(DomainError::Acquisition(acquisition)) =
                cause.downcast_ref::<DomainError>()
            {
                return Self::acquisition_message(acquisition);
            }
            if let Some(BufferError::ResolutionError(ResolutionError::AllMirrorsUnavailable {
                ..
            })) = cause.downcast_ref::<BufferError>()
            {
                return "No server can stream this track right now".to_string();
            }
        }
        error.to_string()
    }

    /// User-facing text of a playback failure.
    pub fn playback_message(error: &PlaybackError) -> String {
        match error {
            PlaybackError::PlaybackSurfaceError { kind, .. } => {
                format!("This track cannot be played: {kind}")
            }
            other => other.to_string(),
        }
    }

    fn acquisition_message(error: &AcquisitionError) -> String {
        match error {
            AcquisitionError::BackendUnavailable { .. } => {
                "The download service is not reachable".to_string()
            }
            AcquisitionError::DownloadFailed { reason } => format!("Download failed: {reason}"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        fmt::{Display, Formatter, Result as FmtResult},
    };

    use anyhow::{Context, anyhow};

    use crate::{
        audio::acquisition::AcquisitionError,
        error::{
            domain::PlaybackError,
            operational::{ErrorReporter, ResultExt},
        },
    };

    #[derive(Debug)]
    struct TestError;

    impl Display for TestError {
        fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
            write!(f, "Test error")
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_result_ext_with_context() {
        let result: Result<i32, TestError> = Err(TestError);
        let error = result.add_context("Additional context").unwrap_err();

        assert!(error.to_string().contains("Additional context"));
    }

    #[test]
    fn test_result_ext_with_contextf() {
        let result: Result<i32, TestError> = Err(TestError);
        let error = result
            .add_contextf(format!("Formatted context: {}", 7))
            .unwrap_err();

        assert!(error.to_string().contains("Formatted context: 7"));
    }

    #[test]
    fn test_error_reporter_user_message() {
        let error = anyhow!("Test error message");
        assert_eq!(ErrorReporter::to_user_message(&error), "Test error message");
    }

    #[test]
    fn test_user_message_finds_known_cause() {
        let result: Result<(), PlaybackError> = Err(PlaybackError::from_surface_code(100));
        let error = result.context("loading track").unwrap_err();
        assert_eq!(
            ErrorReporter::to_user_message(&error),
            "This track cannot be played: content not found"
        );

        let error = anyhow::Error::new(AcquisitionError::BackendUnavailable {
            reason: "refused".to_string(),
        });
        assert_eq!(
            ErrorReporter::to_user_message(&error),
            "The download service is not reachable"
        );
    }
}
