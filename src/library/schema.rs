//! Database schema definition and versioning for the offline artifact store.
//!
//! This module defines the SQLite schema holding downloaded tracks and
//! provides schema versioning for future migrations.

use std::{path::Path, str::FromStr};

use {
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    },
    thiserror::Error,
    tracing::debug,
};

/// Error type for schema operations.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),
    /// Schema migration error.
    #[error("Schema migration error: {reason}")]
    MigrationError { reason: String },
}

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Database schema definition.
pub struct SchemaManager {
    pool: SqlitePool,
}

impl SchemaManager {
    /// Creates a new schema manager over an open pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initializes the database schema.
    ///
    /// Creates the tables on a fresh database and verifies the version of an
    /// existing one.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if initialization fails or the stored version is unknown.
    pub async fn initialize_schema(&self) -> Result<(), SchemaError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let current_version: Option<i32> =
            sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        match current_version {
            None => {
                debug!("Creating artifact schema version {CURRENT_SCHEMA_VERSION}");
                self.create_tables().await?;
                sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                    .bind(CURRENT_SCHEMA_VERSION)
                    .execute(&self.pool)
                    .await?;
            }
            Some(version) if version == CURRENT_SCHEMA_VERSION => {}
            Some(version) => {
                return Err(SchemaError::MigrationError {
                    reason: format!("Schema migration from version {version} not implemented"),
                });
            }
        }

        Ok(())
    }

    async fn create_tables(&self) -> Result<(), SchemaError> {
        sqlx::query(
            r#"
            CREATE TABLE artifacts (
                track_id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                download_date TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                audio BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX idx_artifacts_download_date ON artifacts (download_date)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Gets the current schema version, or 0 if not initialized.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the version table cannot be read.
    pub async fn get_current_version(&self) -> Result<i32, SchemaError> {
        let version: Option<i32> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(version.unwrap_or(0))
    }
}

/// Opens a connection pool on a database file, creating it if missing.
///
/// # Errors
///
/// Returns `SchemaError` if the parent directory or the pool cannot be created.
pub async fn create_connection_pool(path: &Path) -> Result<SqlitePool, SchemaError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SchemaError::MigrationError {
            reason: format!("cannot create {}: {e}", parent.display()),
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Opens a private in-memory database.
///
/// The pool is limited to one connection so every query sees the same database.
///
/// # Errors
///
/// Returns `SchemaError` if the pool cannot be created.
pub async fn create_memory_pool() -> Result<SqlitePool, SchemaError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use crate::library::schema::{
        CURRENT_SCHEMA_VERSION, SchemaError, SchemaManager, create_memory_pool,
    };

    #[test]
    fn test_schema_error_display() {
        let migration_error = SchemaError::MigrationError {
            reason: "test error".to_string(),
        };
        assert_eq!(
            migration_error.to_string(),
            "Schema migration error: test error"
        );
    }

    #[tokio::test]
    async fn test_initialize_schema_is_repeatable() {
        let pool = create_memory_pool().await.unwrap();
        let manager = SchemaManager::new(pool);

        assert_eq!(manager.get_current_version().await.unwrap_or(0), 0);
        manager.initialize_schema().await.unwrap();
        manager.initialize_schema().await.unwrap();
        assert_eq!(
            manager.get_current_version().await.unwrap(),
            CURRENT_SCHEMA_VERSION
        );
    }
}
