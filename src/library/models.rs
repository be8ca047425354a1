//! Data models shared by the acquisition, buffering and queue subsystems.
//!
//! This module defines the playable `Track` unit and the durable records
//! written for tracks downloaded for offline use.

use {
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

/// One playable unit, addressed by the content identifier of the video platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Track {
    /// Opaque content identifier, unique across the system.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Duration hint in seconds, when known before the audio is fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl Track {
    /// Creates a track without a duration hint.
    ///
    /// # Arguments
    ///
    /// * `id` - Content identifier.
    /// * `title` - Display title.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            duration_secs: None,
        }
    }

    /// Attaches a duration hint in seconds.
    #[must_use]
    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

/// Index metadata of a track downloaded for offline playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Content identifier, primary key of the store.
    pub track_id: String,
    /// Title at download time.
    pub title: String,
    /// RFC 3339 timestamp of the completed download.
    pub download_date: String,
    /// Size of the transcoded audio in bytes.
    pub byte_size: u64,
}

impl ArtifactMetadata {
    /// Builds metadata for a freshly transcoded artifact stamped with the current time.
    #[must_use]
    pub fn now(track: &Track, byte_size: u64) -> Self {
        Self {
            track_id: track.id.clone(),
            title: track.title.clone(),
            download_date: chrono::Utc::now().to_rfc3339(),
            byte_size,
        }
    }
}

/// A durable artifact: metadata plus the transcoded audio bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedArtifact {
    /// Index metadata.
    pub metadata: ArtifactMetadata,
    /// Transcoded audio.
    pub audio: Bytes,
}

#[cfg(test)]
mod tests {
    use serde_json::{from_str, to_string};

    use crate::library::models::{ArtifactMetadata, Track};

    #[test]
    fn test_track_builder() {
        let track = Track::new("dQw4w9WgXcQ", "Song").with_duration(212.0);
        assert_eq!(track.id, "dQw4w9WgXcQ");
        assert_eq!(track.duration_secs, Some(212.0));
    }

    #[test]
    fn test_track_without_duration_deserializes() {
        let track: Track = from_str(r#"{"id":"abc","title":"T"}"#).unwrap();
        assert_eq!(track, Track::new("abc", "T"));
        assert!(!to_string(&track).unwrap().contains("duration_secs"));
    }

    #[test]
    fn test_artifact_metadata_now() {
        let metadata = ArtifactMetadata::now(&Track::new("abc", "Title"), 42);
        assert_eq!(metadata.track_id, "abc");
        assert_eq!(metadata.byte_size, 42);
        assert!(chrono::DateTime::parse_from_rfc3339(&metadata.download_date).is_ok());
    }
}
