//! Database connection manager backed by the shared SQLite pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use offsync_common::storage::{SqliteConnection, SqlitePool, SqlitePoolConfig, StorageError};
use offsync_domain::{DatabaseConfig, OffsyncError, Result};
use rusqlite::params;
use tokio::task;
use tracing::info;

use crate::errors::InfraError;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Database manager that wraps an [`SqlitePool`].
#[derive(Debug)]
pub struct DbManager {
    pool: Arc<SqlitePool>,
    path: PathBuf,
}

impl DbManager {
    /// Open the database at `db_path` with the given pool size.
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self> {
        let config = SqlitePoolConfig::default().with_max_size(pool_size.max(1));
        Self::with_pool_config(db_path, config)
    }

    /// Open the queue database described by the configuration.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::with_pool_config(&config.path, pool_config(config))
    }

    pub fn with_pool_config<P: AsRef<Path>>(db_path: P, config: SqlitePoolConfig) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let pool = SqlitePool::open(&path, config).map_err(map_storage_error)?;

        info!(
            db_path = %path.display(),
            max_connections = pool.config().max_size,
            "sqlite pool initialised"
        );

        Ok(Self { pool: Arc::new(pool), path })
    }

    /// Borrow the underlying pool.
    pub fn pool(&self) -> &Arc<SqlitePool> {
        &self.pool
    }

    /// Acquire a connection from the pool.
    pub fn get_connection(&self) -> Result<SqliteConnection> {
        self.pool.get_connection().map_err(map_storage_error)
    }

    /// Ensure the queue schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        create_schema(&conn)?;
        Ok(())
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest applied schema version, `None` before migrations ran.
    pub fn schema_version(&self) -> Result<Option<i32>> {
        let conn = self.get_connection()?;
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
                &[],
                |row| row.get(0),
            )
            .map_err(map_storage_error)?;
        if !exists {
            return Ok(None);
        }
        conn.query_row("SELECT MAX(version) FROM schema_version", &[], |row| row.get(0))
            .map_err(map_storage_error)
    }

    /// Verify the database is accessible and responding.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", &[], |row| row.get::<_, i32>(0)).map_err(map_storage_error)?;
        Ok(())
    }
}

/// Pool settings derived from the database section.
pub(crate) fn pool_config(config: &DatabaseConfig) -> SqlitePoolConfig {
    SqlitePoolConfig::default()
        .with_max_size(config.pool_size.max(1))
        .with_busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .with_connection_timeout(Duration::from_secs(config.connection_timeout_secs))
}

fn create_schema(conn: &SqliteConnection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL).map_err(map_storage_error)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, CAST(strftime('%s','now') AS INTEGER))",
        params![SCHEMA_VERSION],
    )
    .map_err(map_storage_error)?;
    Ok(())
}

pub(crate) fn map_sql_error(err: rusqlite::Error) -> OffsyncError {
    OffsyncError::from(InfraError::from(err))
}

pub(crate) fn map_storage_error(err: StorageError) -> OffsyncError {
    OffsyncError::from(InfraError::from(err))
}

pub(crate) fn map_join_error(err: task::JoinError) -> OffsyncError {
    if err.is_cancelled() {
        OffsyncError::Internal("blocking task cancelled".into())
    } else {
        OffsyncError::Internal(format!("blocking task failed: {err}"))
    }
}
