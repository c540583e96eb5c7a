//! # Local Database Module
//!
//! Local durable store for the offline-resilience subsystem. Persists
//! entity snapshots keyed by `(collection, entity_id)` and the pending
//! operation queue, both surviving process restarts.
//!
//! ## Layout
//!
//! - `offline_records` - snapshots written when a remote write failed
//! - `pending_operations` - mutations not yet confirmed by the remote service
//! - `sync_metadata` - small key/value facts such as the last sync time
//!
//! ## Key Components
//!
//! - `LocalDatabase`: connection pool and schema management
//! - `schema.rs`: table definitions and versioning
//! - `records.rs`: offline record put/get/list/remove
//! - `sync.rs`: pending operation persistence and sync metadata
//!
//! Writes are never retried here. This store is the fallback of last
//! resort, so a disk failure surfaces to the caller as `SyncError::Database`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync::client::local_db::{LocalDatabase, OfflineRecord, OfflineOperation};
//!
//! # async fn example() -> fieldsync::shared::Result<()> {
//! let db = LocalDatabase::open("/var/lib/fieldsync/local.db").await?;
//! let records = db.get_all_records("agencies").await?;
//! # Ok(())
//! # }
//! ```

pub mod schema;
pub mod records;
pub mod sync;

pub use records::{OfflineOperation, OfflineRecord};
pub use sync::StashedWrite;

use crate::shared::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;

/// Local database connection manager
///
/// Manages the SQLite connection pool and provides the storage operations
/// used by the sync engine and the resilient façades.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the local database file
    ///
    /// Creates parent directories and the file if needed, then initializes
    /// the schema. Uses WAL mode so readers do not block the drain.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        tracing::debug!(path = %path.display(), "Opened local database");
        Ok(db)
    }

    /// Open a throwaway in-memory database
    ///
    /// A single connection that never expires, since every new SQLite
    /// memory connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Initialize database schema
    ///
    /// Creates all necessary tables and runs any pending migrations.
    async fn init_schema(&self) -> Result<()> {
        for statement in schema::SCHEMA_V1 {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        self.run_migrations().await
    }

    /// Run database migrations
    ///
    /// Checks the current schema version and records any pending migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version: (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        if !schema::needs_migration(current_version.0) {
            tracing::debug!(version = current_version.0, "Local schema up to date");
            return Ok(());
        }

        for version in schema::get_pending_migrations(current_version.0) {
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
            tracing::info!(version, "Applied local schema migration");
        }

        Ok(())
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i32> {
        let row: (i32,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get database statistics
    ///
    /// Returns basic statistics about the local database for status screens.
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let offline_records: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM offline_records")
            .fetch_one(&self.pool)
            .await?;

        let pending_sync_records: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM offline_records WHERE pending_sync = 1")
                .fetch_one(&self.pool)
                .await?;

        let pending_operations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            offline_records: offline_records.0 as u64,
            pending_sync_records: pending_sync_records.0 as u64,
            pending_operations: pending_operations.0 as u64,
        })
    }

    /// Close the pool, flushing the WAL
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Snapshots held in the local store
    pub offline_records: u64,
    /// Snapshots still waiting for remote confirmation
    pub pending_sync_records: u64,
    /// Operations in the queue
    pub pending_operations: u64,
}
