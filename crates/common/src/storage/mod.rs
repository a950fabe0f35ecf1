//! Pooled SQLite storage
//!
//! r2d2-backed connection pooling with per-connection pragmas. Schema
//! management stays with the application layer.

pub mod error;
pub mod sqlite;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use sqlite::{
    apply_connection_pragmas, PoolHealth, SqliteConnection, SqlitePool, SqlitePoolConfig,
    SqliteStatement,
};
