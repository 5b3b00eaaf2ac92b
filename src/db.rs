//! SQLite index: pool setup, pragmas and migrations.
//!
//! The index lives at `<root>/index.db` and is the single durable store for
//! papers, categories, citation edges, embeddings and the harvest checkpoint.
//!
//! ```no_run
//! use mirror_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("mirror/index.db")).await?;
//! assert!(db.is_wal_enabled().await?);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Pool size when none is configured. SQLite serializes writers anyway.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked index before `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Failures opening the index.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("cannot open mirror index: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("cannot migrate mirror index: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pool tuning for [`Database::with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbOptions {
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// Per-connection busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Pooled handle on the mirror index.
///
/// Cloning is cheap; every clone shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens `index_path` with [`DbOptions::default`].
    ///
    /// # Errors
    ///
    /// See [`Database::with_options`].
    pub async fn new(index_path: &Path) -> Result<Self, DbError> {
        Self::with_options(index_path, DbOptions::default()).await
    }

    /// Opens (creating if absent) the index at `index_path` and brings its
    /// schema up to date.
    ///
    /// Every pooled connection runs in WAL mode with the configured busy
    /// timeout, so readers never block the harvest writer.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the file cannot be opened and
    /// [`DbError::Migration`] if a migration fails.
    #[instrument(skip(index_path), fields(path = %index_path.display(), max = options.max_connections))]
    pub async fn with_options(index_path: &Path, options: DbOptions) -> Result<Self, DbError> {
        let connect = SqliteConnectOptions::new()
            .filename(index_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;
        Self::migrated(pool).await
    }

    /// Private in-memory index with the full schema, for tests.
    ///
    /// The single connection never idles out; closing it drops the data.
    ///
    /// # Errors
    ///
    /// Same as [`Database::with_options`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let connect = SqliteConnectOptions::new().in_memory(true).foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("index schema up to date");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the index runs in write-ahead-log mode.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Waits for in-flight queries, then closes every connection.
    pub async fn close(self) {
        self.pool.close().await;
        debug!("index closed");
    }
}
