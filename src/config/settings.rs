//! User preference management with XDG Base Directory compliance.
//!
//! This module provides user settings management with proper XDG directory
//! usage for config, cache and offline data files.

use std::{
    env::var,
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::PathBuf,
    time::Duration,
};

use {
    parking_lot::{RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

/// Application directory name under the XDG base directories.
const APP_DIR: &str = "offtrack";

/// MP3 bitrates (kbps) accepted by the transcoder.
pub const SUPPORTED_BITRATES: [u32; 6] = [96, 128, 160, 192, 256, 320];

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write settings file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize settings.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// Serializable user settings structure with default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Look-ahead buffer ceiling in seconds of audio.
    pub buffer_budget_secs: f64,
    /// Duration assumed for a track whose length is not yet known.
    pub estimated_track_secs: f64,
    /// Whether upcoming tracks are buffered ahead of playback.
    pub buffer_enabled: bool,
    /// Ordered mirror base URLs tried by the source resolver.
    pub mirrors: Vec<String>,
    /// Audio quality selector (itag) requested from mirrors.
    pub mirror_quality: String,
    /// Timeout of a single mirror probe in milliseconds.
    pub probe_timeout_ms: u64,
    /// Base URL of the remote conversion backend.
    pub backend_url: String,
    /// MP3 bitrate of offline artifacts in kbps.
    pub transcode_bitrate_kbps: u32,
    /// Output sample rate of offline artifacts.
    pub transcode_sample_rate: u32,
    /// Delay before skipping past a track that failed to play.
    pub error_skip_delay_ms: u64,
    /// How many times `play` is re-issued while a load is still pending.
    pub force_play_attempts: u32,
    /// Interval between forced `play` attempts in milliseconds.
    pub force_play_interval_ms: u64,
    /// Length of the recently played list.
    pub recent_tracks_limit: usize,
    /// Whether the queue advances automatically at the end of a track.
    pub autoplay: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            buffer_budget_secs: 1200.0, // 20 minutes
            estimated_track_secs: 240.0,
            buffer_enabled: true,
            mirrors: vec![
                "https://invidious.snopyta.org".to_string(),
                "https://invidious.kavin.rocks".to_string(),
                "https://vid.puffyan.us".to_string(),
                "https://yt.artemislena.eu".to_string(),
            ],
            mirror_quality: "140".to_string(), // AAC audio
            probe_timeout_ms: 3000,
            backend_url: "http://localhost:5000".to_string(),
            transcode_bitrate_kbps: 192,
            transcode_sample_rate: 44100,
            error_skip_delay_ms: 2000,
            force_play_attempts: 5,
            force_play_interval_ms: 500,
            recent_tracks_limit: 20,
            autoplay: false,
        }
    }
}

impl UserSettings {
    /// Checks that values are usable by the audio components.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |reason: &str| {
            Err(SettingsError::InvalidValue {
                reason: reason.to_string(),
            })
        };

        if !(self.buffer_budget_secs > 0.0) {
            return invalid("buffer budget must be positive");
        }
        if !(self.estimated_track_secs > 0.0) {
            return invalid("estimated track duration must be positive");
        }
        if !SUPPORTED_BITRATES.contains(&self.transcode_bitrate_kbps) {
            return Err(SettingsError::InvalidValue {
                reason: format!(
                    "unsupported bitrate {} kbps",
                    self.transcode_bitrate_kbps
                ),
            });
        }
        if self.transcode_sample_rate == 0 {
            return invalid("transcode sample rate must be positive");
        }
        if self.backend_url.trim().is_empty() {
            return invalid("backend URL is empty");
        }
        if self.probe_timeout_ms == 0 {
            return invalid("probe timeout must be positive");
        }
        if self.recent_tracks_limit == 0 {
            return invalid("recent tracks limit must be positive");
        }
        Ok(())
    }

    /// Mirror probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Delay before an automatic skip past a failed track.
    #[must_use]
    pub fn error_skip_delay(&self) -> Duration {
        Duration::from_millis(self.error_skip_delay_ms)
    }
}

/// Handles loading, saving, and validation of user preferences.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe user settings storage.
    settings: RwLock<UserSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
}

impl SettingsManager {
    /// Creates a new settings manager with default config path.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Creates a new settings manager with a custom config path (for testing).
    ///
    /// # Arguments
    ///
    /// * `config_path` - Custom path for the settings file
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk or are invalid.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, SettingsError> {
        if let Some(parent) = config_path.parent() {
            create_dir_all(parent)?;
        }

        let settings: UserSettings = if config_path.exists() {
            debug!("Loading settings from existing file: {:?}", config_path);
            let contents = read_to_string(&config_path)?;
            from_str(&contents)?
        } else {
            debug!("Using default settings, no file at {:?}", config_path);
            UserSettings::default()
        };
        settings.validate()?;

        Ok(SettingsManager {
            settings: RwLock::new(settings),
            config_path,
        })
    }

    /// Gets the current settings.
    pub fn get_settings(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.settings.read()
    }

    /// Gets the configuration file path.
    pub fn get_config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Validates, applies and saves new settings.
    ///
    /// # Arguments
    ///
    /// * `new_settings` - New settings to apply.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the settings are invalid or cannot be saved to disk.
    pub fn update_settings(&self, new_settings: UserSettings) -> Result<(), SettingsError> {
        new_settings.validate()?;
        let mut settings_write = self.settings.write();
        *settings_write = new_settings;
        drop(settings_write);
        self.save_settings()
    }

    /// Saves the current settings to disk.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be saved to disk.
    pub fn save_settings(&self) -> Result<(), SettingsError> {
        debug!("Saving settings to file: {:?}", self.config_path);
        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Path of the settings file under the XDG config home.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push(APP_DIR);
    config_dir.push("settings.json");
    config_dir
}

/// Gets the cache directory path, home of the artifact database and session files.
#[must_use]
pub fn get_cache_dir() -> PathBuf {
    let mut cache_dir = get_xdg_cache_home();
    cache_dir.push(APP_DIR);
    cache_dir
}

/// Path of the offline artifact database.
#[must_use]
pub fn get_artifact_db_path() -> PathBuf {
    get_cache_dir().join("artifacts.db")
}

/// Gets the XDG config home directory following XDG Base Directory specification.
///
/// Uses `XDG_CONFIG_HOME` environment variable if set, otherwise defaults to $HOME/.config
fn get_xdg_config_home() -> PathBuf {
    xdg_home("XDG_CONFIG_HOME", ".config")
}

/// Gets the XDG cache home directory following XDG Base Directory specification.
///
/// Uses `XDG_CACHE_HOME` environment variable if set, otherwise defaults to $HOME/.cache
fn get_xdg_cache_home() -> PathBuf {
    xdg_home("XDG_CACHE_HOME", ".cache")
}

fn xdg_home(env_key: &str, home_fallback: &str) -> PathBuf {
    if let Ok(dir) = var(env_key)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }

    if let Ok(home) = var("HOME") {
        let mut path = PathBuf::from(home);
        path.push(home_fallback);
        return path;
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind::NotFound};

    use serde_json::{from_str, to_string};

    use crate::config::settings::{SettingsError, SettingsManager, UserSettings};

    #[test]
    fn test_user_settings_default() {
        let settings = UserSettings::default();
        assert_eq!(settings.buffer_budget_secs, 1200.0);
        assert_eq!(settings.estimated_track_secs, 240.0);
        assert_eq!(settings.mirrors.len(), 4);
        assert_eq!(settings.mirror_quality, "140");
        assert_eq!(settings.transcode_bitrate_kbps, 192);
        assert_eq!(settings.recent_tracks_limit, 20);
        assert!(!settings.autoplay);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_user_settings_serialization() {
        let settings = UserSettings {
            buffer_budget_secs: 600.0,
            mirrors: vec!["https://mirror.test".to_string()],
            autoplay: true,
            ..UserSettings::default()
        };

        let serialized = to_string(&settings).unwrap();
        let deserialized: UserSettings = from_str(&serialized).unwrap();
        assert_eq!(settings, deserialized);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: UserSettings = from_str(r#"{"autoplay":true}"#).unwrap();
        assert!(settings.autoplay);
        assert_eq!(settings.backend_url, "http://localhost:5000");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_budget = UserSettings {
            buffer_budget_secs: 0.0,
            ..UserSettings::default()
        };
        assert!(zero_budget.validate().is_err());

        let odd_bitrate = UserSettings {
            transcode_bitrate_kbps: 193,
            ..UserSettings::default()
        };
        assert!(
            odd_bitrate
                .validate()
                .unwrap_err()
                .to_string()
                .contains("193")
        );

        let no_backend = UserSettings {
            backend_url: "  ".to_string(),
            ..UserSettings::default()
        };
        assert!(no_backend.validate().is_err());
    }

    #[test]
    fn test_settings_manager_persists_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offtrack").join("settings.json");

        let manager = SettingsManager::with_config_path(path.clone()).unwrap();
        assert_eq!(*manager.get_settings(), UserSettings::default());

        let updated = UserSettings {
            error_skip_delay_ms: 500,
            ..UserSettings::default()
        };
        manager.update_settings(updated.clone()).unwrap();

        let reloaded = SettingsManager::with_config_path(path).unwrap();
        assert_eq!(*reloaded.get_settings(), updated);
    }

    #[test]
    fn test_update_rejects_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            SettingsManager::with_config_path(dir.path().join("settings.json")).unwrap();

        let invalid = UserSettings {
            recent_tracks_limit: 0,
            ..UserSettings::default()
        };
        assert!(manager.update_settings(invalid).is_err());
        assert_eq!(manager.get_settings().recent_tracks_limit, 20);
    }

    #[test]
    fn test_settings_error_display() {
        let io_error = Error::new(NotFound, "File not found");
        let settings_error = SettingsError::IoError(io_error);
        assert!(settings_error.to_string().contains("IO error"));

        let invalid_value_error = SettingsError::InvalidValue {
            reason: "test reason".to_string(),
        };
        assert_eq!(
            invalid_value_error.to_string(),
            "Invalid settings value: test reason"
        );
    }
}
