//! Conversions from external infrastructure errors into domain errors.

use offsync_common::storage::StorageError;
use offsync_domain::OffsyncError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub OffsyncError);

impl From<InfraError> for OffsyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<OffsyncError> for InfraError {
    fn from(value: OffsyncError) -> Self {
        InfraError(value)
    }
}

trait IntoOffsyncError {
    fn into_offsync(self) -> OffsyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → OffsyncError */
/* -------------------------------------------------------------------------- */

impl IntoOffsyncError for SqlError {
    fn into_offsync(self) -> OffsyncError {
        use rusqlite::ffi::{ErrorCode, SQLITE_CONSTRAINT_CHECK, SQLITE_CONSTRAINT_UNIQUE};
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        OffsyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        OffsyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, SQLITE_CONSTRAINT_UNIQUE) => {
                        OffsyncError::Database(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, SQLITE_CONSTRAINT_CHECK) => {
                        OffsyncError::InvalidInput(format!("check constraint violation: {message}"))
                    }
                    _ => OffsyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => OffsyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                OffsyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                OffsyncError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::Utf8Error(_) => OffsyncError::Database("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidPath(path) => OffsyncError::Config(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => OffsyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_offsync())
    }
}

/* -------------------------------------------------------------------------- */
/* StorageError → OffsyncError */
/* -------------------------------------------------------------------------- */

impl IntoOffsyncError for StorageError {
    fn into_offsync(self) -> OffsyncError {
        match self {
            StorageError::Rusqlite(err) => err.into_offsync(),
            StorageError::Timeout(seconds) => {
                OffsyncError::Database(format!("connection checkout timed out after {seconds}s"))
            }
            StorageError::InvalidConfig(message) => OffsyncError::Config(message),
            StorageError::SerdeJson(err) => {
                OffsyncError::Database(format!("stored JSON is invalid: {err}"))
            }
            StorageError::Io(err) => OffsyncError::Database(format!("database I/O error: {err}")),
            StorageError::R2d2(err) => OffsyncError::Database(format!("connection pool: {err}")),
            StorageError::Connection(message)
            | StorageError::Query(message)
            | StorageError::Migration(message) => OffsyncError::Database(message),
        }
    }
}

impl From<StorageError> for InfraError {
    fn from(value: StorageError) -> Self {
        InfraError(value.into_offsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → OffsyncError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(OffsyncError::Database(format!("connection pool: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
