//! Durable store adapter for tracks downloaded for offline playback.
//!
//! `ArtifactStore` is the persistence seam used by the acquisition pipeline
//! (sole writer) and the look-ahead buffer (reader). Two implementations are
//! provided: `SqliteArtifactStore` backed by `sqlx`, and `MemoryArtifactStore`.

use std::{collections::HashMap, path::Path};

use {
    async_trait::async_trait,
    bytes::Bytes,
    parking_lot::RwLock,
    sqlx::{Row, SqlitePool, sqlite::SqliteRow},
    thiserror::Error,
    tracing::debug,
};

use crate::library::{
    models::ArtifactMetadata,
    schema::{SchemaError, SchemaManager, create_connection_pool, create_memory_pool},
};

/// Error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    /// Schema initialization error.
    #[error("Schema error: {0}")]
    SchemaError(#[from] SchemaError),
    /// A stored record could not be interpreted.
    #[error("Invalid data: {reason}")]
    InvalidData { reason: String },
}

/// Persistence interface keyed by track id.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores audio bytes and metadata under `key`.
    ///
    /// The write is all-or-nothing. Writing a key that already exists leaves the
    /// existing artifact untouched.
    async fn put(&self, key: &str, audio: &[u8], metadata: &ArtifactMetadata)
    -> Result<(), StoreError>;

    /// Returns the audio bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Returns whether an artifact exists under `key`.
    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes the artifact under `key`; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists the metadata of every stored artifact, newest download first.
    async fn list_metadata(&self) -> Result<Vec<ArtifactMetadata>, StoreError>;
}

/// SQLite-backed artifact store.
pub struct SqliteArtifactStore {
    pool: SqlitePool,
}

impl SqliteArtifactStore {
    /// Opens (or creates) the store at `path` and initializes its schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = create_connection_pool(path).await?;
        Self::with_pool(pool).await
    }

    /// Opens a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the database cannot be initialized.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = create_memory_pool().await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        SchemaManager::new(pool.clone()).initialize_schema().await?;
        Ok(Self { pool })
    }

    fn metadata_from_row(row: &SqliteRow) -> Result<ArtifactMetadata, StoreError> {
        let byte_size: i64 = row.try_get("byte_size")?;
        Ok(ArtifactMetadata {
            track_id: row.try_get("track_id")?,
            title: row.try_get("title")?,
            download_date: row.try_get("download_date")?,
            byte_size: u64::try_from(byte_size).map_err(|_| StoreError::InvalidData {
                reason: format!("negative byte size {byte_size}"),
            })?,
        })
    }
}

#[async_trait]
impl ArtifactStore for SqliteArtifactStore {
    async fn put(
        &self,
        key: &str,
        audio: &[u8],
        metadata: &ArtifactMetadata,
    ) -> Result<(), StoreError> {
        let byte_size = i64::try_from(metadata.byte_size).map_err(|_| StoreError::InvalidData {
            reason: format!("byte size {} out of range", metadata.byte_size),
        })?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO artifacts (track_id, title, download_date, byte_size, audio)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (track_id) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(&metadata.title)
        .bind(&metadata.download_date)
        .bind(byte_size)
        .bind(audio)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            debug!("Artifact store: {key} already present, write ignored");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let audio: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT audio FROM artifacts WHERE track_id = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(audio.map(Bytes::from))
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM artifacts WHERE track_id = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM artifacts WHERE track_id = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_metadata(&self) -> Result<Vec<ArtifactMetadata>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT track_id, title, download_date, byte_size
            FROM artifacts
            ORDER BY download_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::metadata_from_row).collect()
    }
}

/// In-memory artifact store, lost on drop.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<String, (ArtifactMetadata, Bytes)>>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        key: &str,
        audio: &[u8],
        metadata: &ArtifactMetadata,
    ) -> Result<(), StoreError> {
        self.artifacts
            .write()
            .entry(key.to_string())
            .or_insert_with(|| (metadata.clone(), Bytes::copy_from_slice(audio)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.artifacts.read().get(key).map(|(_, audio)| audio.clone()))
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.artifacts.read().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.artifacts.write().remove(key);
        Ok(())
    }

    async fn list_metadata(&self) -> Result<Vec<ArtifactMetadata>, StoreError> {
        let mut metadata: Vec<ArtifactMetadata> = self
            .artifacts
            .read()
            .values()
            .map(|(metadata, _)| metadata.clone())
            .collect();
        metadata.sort_by(|a, b| b.download_date.cmp(&a.download_date));
        Ok(metadata)
    }
}
