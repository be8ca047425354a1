//! User preferences and persistent configuration.
//!
//! This module provides user preference management with XDG Base Directory
//! compliance.

pub mod settings;

pub use settings::{
    SettingsError, SettingsManager, UserSettings, get_artifact_db_path, get_cache_dir,
    get_config_path,
};
