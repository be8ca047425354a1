//! Persistence of the recently played list and the resumable player snapshot.

use std::{
    fs::{create_dir_all, read_to_string, remove_file, write},
    io::Error as StdError,
    path::PathBuf,
};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

use crate::library::models::Track;

/// Error type for session persistence.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Failed to read or write a session file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize session data.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
}

/// Resumable player state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    /// Track loaded at save time.
    pub track: Option<Track>,
    /// Full queue in play order.
    pub queue: Vec<Track>,
    /// Position of `track` within `queue`.
    pub current_index: Option<usize>,
    /// Whether playback was running at save time.
    pub is_playing: bool,
    /// RFC 3339 save timestamp.
    pub saved_at: String,
}

/// Storage of session state that outlives the process.
pub trait SessionStore: Send + Sync {
    /// Loads the recently played list, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the stored list cannot be read.
    fn load_recent(&self) -> Result<Vec<Track>, SessionError>;

    /// Replaces the recently played list.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the list cannot be written.
    fn save_recent(&self, tracks: &[Track]) -> Result<(), SessionError>;

    /// Loads the last saved snapshot, if any.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the snapshot exists but cannot be read.
    fn load_snapshot(&self) -> Result<Option<PlayerSnapshot>, SessionError>;

    /// Saves the snapshot, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the snapshot cannot be written.
    fn save_snapshot(&self, snapshot: &PlayerSnapshot) -> Result<(), SessionError>;

    /// Removes the saved snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if an existing snapshot cannot be removed.
    fn clear_snapshot(&self) -> Result<(), SessionError>;
}

/// Moves `track` to the front of `recent`, dropping duplicates and truncating to `limit`.
pub fn push_recent(recent: &mut Vec<Track>, track: &Track, limit: usize) {
    recent.retain(|t| t.id != track.id);
    recent.insert(0, track.clone());
    recent.truncate(limit);
}

/// JSON files in a directory.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    dir: PathBuf,
}

impl JsonSessionStore {
    /// Creates a store writing into `dir`, which is created on first write.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn recent_path(&self) -> PathBuf {
        self.dir.join("recent.json")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("player.json")
    }

    fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<(), SessionError> {
        create_dir_all(&self.dir)?;
        let contents = to_string_pretty(value)?;
        write(&path, contents)?;
        debug!("Session: wrote {:?}", path);
        Ok(())
    }
}

impl SessionStore for JsonSessionStore {
    fn load_recent(&self) -> Result<Vec<Track>, SessionError> {
        let path = self.recent_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(from_str(&read_to_string(path)?)?)
    }

    fn save_recent(&self, tracks: &[Track]) -> Result<(), SessionError> {
        self.write_json(self.recent_path(), &tracks)
    }

    fn load_snapshot(&self) -> Result<Option<PlayerSnapshot>, SessionError> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(from_str(&read_to_string(path)?)?))
    }

    fn save_snapshot(&self, snapshot: &PlayerSnapshot) -> Result<(), SessionError> {
        self.write_json(self.snapshot_path(), snapshot)
    }

    fn clear_snapshot(&self) -> Result<(), SessionError> {
        let path = self.snapshot_path();
        if path.exists() {
            remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::library::{
        models::Track,
        session::{JsonSessionStore, PlayerSnapshot, SessionStore, push_recent},
    };

    #[test]
    fn test_push_recent_moves_to_front_and_bounds() {
        let mut recent = vec![Track::new("a", "A"), Track::new("b", "B")];

        push_recent(&mut recent, &Track::new("b", "B"), 3);
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        push_recent(&mut recent, &Track::new("c", "C"), 2);
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_json_session_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path().join("session"));

        assert!(store.load_recent().unwrap().is_empty());
        assert!(store.load_snapshot().unwrap().is_none());

        let tracks = vec![Track::new("a", "A"), Track::new("b", "B")];
        store.save_recent(&tracks).unwrap();
        assert_eq!(store.load_recent().unwrap(), tracks);

        let snapshot = PlayerSnapshot {
            track: Some(tracks[1].clone()),
            queue: tracks.clone(),
            current_index: Some(1),
            is_playing: true,
            saved_at: "2024-05-01T10:00:00+00:00".to_string(),
        };
        store.save_snapshot(&snapshot).unwrap();
        assert_eq!(store.load_snapshot().unwrap(), Some(snapshot));

        store.clear_snapshot().unwrap();
        store.clear_snapshot().unwrap();
        assert!(store.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("player.json"), "not json").unwrap();

        let store = JsonSessionStore::new(dir.path().to_path_buf());
        assert!(store.load_snapshot().is_err());
    }
}
