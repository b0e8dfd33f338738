#![allow(clippy::too_many_arguments)]
//! SQLite-backed persistence for codemem: schema, migrations, and the
//! transactional write primitives every other crate builds on.

mod legacy;
mod migrations;
mod queries;

pub use queries::memory_items::MemoryItem;
pub use queries::peers::{Peer, SyncAttempt, MAX_SYNC_ATTEMPTS};
pub use queries::raw_events::{
    IngestOutcome, RawEvent, RawEventBatchStatus, RawEventStats, RawEventStatus, ReliabilityMetrics,
};
pub use queries::replication::{
    filter_replication_ops_for_sync, ApplyOutcome, ReplicationOp, ReplicationOpType,
};
pub use queries::sessions::Session;
pub use queries::usage_events::UsageEvent;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("failed to determine cache directory")]
    NoCacheDir,

    #[error("failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    #[error("schema/migration precondition violated: {0}")]
    Integrity(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// The persistence handle wrapping a pooled SQLite connection.
///
/// One logical writer at a time per handle is enforced by an internal write
/// mutex (see [`Database::write_tx`]); readers use the pool directly since
/// SQLite's own WAL-mode locking allows concurrent reads.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
    write_lock: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl Database {
    /// Open (or create) the database at the given path, migrating the
    /// legacy layout into place first if present, then run migrations.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        legacy::migrate_legacy_layout(path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30))
            .log_slow_statements(
                tracing::log::LevelFilter::Warn,
                std::time::Duration::from_secs(5),
            );

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            db_path: path.to_owned(),
            write_lock: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        };
        db.run_migrations().await?;

        info!("database opened at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database (for testing). Uses `shared_cache(true)`
    /// so every pooled connection sees the same database.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .shared_cache(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            db_path: PathBuf::new(),
            write_lock: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open the database at the default location (`CODEMEM_DB` override, or
    /// the platform cache directory).
    pub async fn open_default() -> DbResult<Self> {
        let path = codemem_core::paths::db_path().ok_or(DbError::NoCacheDir)?;
        Self::new(&path).await
    }

    /// Run all inline migrations not yet recorded in `_migrations`, then
    /// reconcile schema columns that may be missing despite a recorded
    /// version (idempotent; cheap at current version per the persistence
    /// layer's `initialize_schema` contract).
    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1;
            if version > current_version {
                let is_multi_statement =
                    migration.contains("BEGIN") || migration.matches(';').count() > 1;
                let result = if is_multi_statement {
                    sqlx::raw_sql(migration).execute(&self.pool).await.map(|_| ())
                } else {
                    sqlx::query(migration).execute(&self.pool).await.map(|_| ())
                };
                match result {
                    Ok(_) => {}
                    Err(e) if e.to_string().contains("duplicate column name") => {}
                    Err(e) if e.to_string().contains("already exists") => {}
                    Err(e) => return Err(e.into()),
                }
                sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                    .bind(version as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        self.normalize_kinds().await?;
        Ok(())
    }

    /// Cheap post-migration normalization: force stored `kind` values to the
    /// canonical set. Runs every open, not only on first migration, per the
    /// "idempotent at current version" contract.
    async fn normalize_kinds(&self) -> DbResult<()> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, kind FROM memory_items")
            .fetch_all(&self.pool)
            .await?;
        for (id, kind) in rows {
            let canonical = codemem_core::normalize_kind(&kind).as_str();
            if canonical != kind {
                sqlx::query("UPDATE memory_items SET kind = ? WHERE id = ?")
                    .bind(canonical)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Empty for in-memory databases.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Acquire the single-writer guard. Held only across the transaction
    /// body; never across an HTTP call or timer wait.
    pub(crate) async fn write_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_schema() {
        let db = Database::new_in_memory().await.expect("in-memory db");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memory_items")
            .fetch_one(db.pool())
            .await
            .expect("memory_items should exist");
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Database::new_in_memory().await.expect("first open");
        db.run_migrations().await.expect("second run should not error");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM replication_ops")
            .fetch_one(db.pool())
            .await
            .expect("replication_ops should still exist");
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn file_based_database_persists() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("codemem.db");
        let db = Database::new(&path).await.expect("file db");
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(db.pool())
            .await
            .expect("sessions should exist");
        assert_eq!(count.0, 0);
        assert!(path.exists());
    }
}
