//! Temporary SQLite databases for tests.
//!
//! The database file lives in a temporary directory removed on drop.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::storage::{SqlitePool, SqlitePoolConfig, StorageResult};

/// Pooled database in a temporary directory.
#[derive(Debug)]
pub struct TestDatabase {
    // Held for RAII cleanup
    _temp_dir: TempDir,
    db_path: PathBuf,
    pool: SqlitePool,
}

impl TestDatabase {
    /// Create a database with the default pool config.
    pub fn new() -> StorageResult<Self> {
        Self::with_pool_config(SqlitePoolConfig::default())
    }

    /// Create a database with a custom pool config.
    pub fn with_pool_config(config: SqlitePoolConfig) -> StorageResult<Self> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("offsync-test.db");
        let pool = SqlitePool::open(&db_path, config)?;
        Ok(Self { _temp_dir: temp_dir, db_path, pool })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_is_removed_on_drop() {
        let db = TestDatabase::new().unwrap();
        let path = db.path().to_path_buf();
        db.pool().get_connection().unwrap().execute_batch("CREATE TABLE t (x)").unwrap();
        assert!(path.exists());

        drop(db);
        assert!(!path.exists());
    }
}
