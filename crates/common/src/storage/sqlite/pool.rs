//! SQLite connection pool
//!
//! r2d2 pool whose connections get the standard pragmas on open.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::{debug, info, instrument, warn};

use super::config::SqlitePoolConfig;
use super::connection::SqliteConnection;
use super::pragmas::apply_connection_pragmas;
use crate::storage::error::{StorageError, StorageResult};

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHealth {
    pub healthy: bool,
    pub connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
}

/// Pooled SQLite database
#[derive(Debug)]
pub struct SqlitePool {
    pool: Pool<SqliteConnectionManager>,
    config: SqlitePoolConfig,
}

impl SqlitePool {
    /// Open (creating if needed) the database at `path`.
    ///
    /// A test connection is checked out before returning so a bad path or a
    /// corrupt file fails here rather than on first use.
    #[instrument(fields(db_path = ?path, pool_size = config.max_size))]
    pub fn open(path: &Path, config: SqlitePoolConfig) -> StorageResult<Self> {
        info!("Creating SQLite connection pool");

        if config.max_size == 0 {
            return Err(StorageError::InvalidConfig("pool size must be at least 1".into()));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let pool_config = config.clone();
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            apply_connection_pragmas(conn, &pool_config)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        });

        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| {
                warn!("Failed to create connection pool: {}", e);
                StorageError::Connection(format!("Failed to create pool: {e}"))
            })?;

        {
            let conn = pool.get().map_err(|e| {
                StorageError::Connection(format!("Failed to get test connection: {e}"))
            })?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            debug!("Test connection succeeded");
        }

        info!("SQLite pool created with {} connections", config.max_size);
        Ok(Self { pool, config })
    }

    /// Check out a connection
    pub fn get_connection(&self) -> StorageResult<SqliteConnection> {
        let start = std::time::Instant::now();
        match self.pool.get() {
            Ok(conn) => {
                debug!("Connection acquired in {}ms", start.elapsed().as_millis());
                Ok(SqliteConnection::new(conn))
            }
            Err(e) => {
                let message = e.to_string();
                if message.to_lowercase().contains("timed out") {
                    warn!("Connection timeout after {:?}", self.config.connection_timeout);
                    Err(StorageError::Timeout(self.config.connection_timeout.as_secs()))
                } else {
                    warn!("Connection error: {}", message);
                    Err(StorageError::Connection(format!("Failed to get connection: {message}")))
                }
            }
        }
    }

    pub fn health_check(&self) -> PoolHealth {
        let state = self.pool.state();
        PoolHealth {
            healthy: self.pool.get().is_ok(),
            connections: state.connections,
            idle_connections: state.idle_connections,
            max_connections: self.config.max_size,
        }
    }

    pub fn config(&self) -> &SqlitePoolConfig {
        &self.config
    }
}
