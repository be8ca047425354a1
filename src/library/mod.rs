//! Durable storage of offline tracks and session state.
//!
//! This module provides the data models, the artifact database schema, the
//! `ArtifactStore` adapter and JSON session persistence.

pub mod models;
pub mod schema;
pub mod session;
pub mod store;

pub use {
    models::{ArtifactMetadata, PersistedArtifact, Track},
    schema::{CURRENT_SCHEMA_VERSION, SchemaManager, create_connection_pool, create_memory_pool},
    session::{JsonSessionStore, PlayerSnapshot, SessionError, SessionStore, push_recent},
    store::{ArtifactStore, MemoryArtifactStore, SqliteArtifactStore, StoreError},
};
