//! SQLite-backed implementation of the queue store port.
//!
//! Every status change is a compare-and-set `UPDATE ... WHERE status = ?`;
//! the partial unique index on active keys enforces one pending or in-flight
//! record per `(entity_type, entity_id, kind)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offsync_common::storage::SqliteConnection;
use offsync_common::{Clock, SystemClock};
use offsync_core::QueueStore;
use offsync_domain::constants::STALE_IN_FLIGHT_ERROR;
use offsync_domain::{
    EntityType, FailedEntitySummary, IdMapping, NewOperation, OffsyncError, OperationKind,
    OperationRecord, OperationStatus, ResetFilter, Result, StatusSummary,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde_json::Value;
use tokio::task;
use tracing::{debug, info};

use super::id_mapping_repository::upsert_mapping;
use super::manager::{map_join_error, map_sql_error, map_storage_error, DbManager};

const RECORD_COLUMNS: &str = "id, entity_type, entity_id, kind, payload, priority, status, \
     retry_count, lifetime_failures, last_error, remote_id, created_at, started_at, \
     processed_at, seq";

/// Durable operation queue in the `sync_operations` table.
pub struct SqliteQueueStore {
    db: Arc<DbManager>,
    clock: Arc<dyn Clock>,
}

impl SqliteQueueStore {
    /// Construct a queue store backed by the shared SQLite manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db, clock: Arc::new(SystemClock) }
    }

    /// Stamp records with the given clock instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `f` on a pooled connection off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection, i64) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let now = self.clock.now_millis();

        task::spawn_blocking(move || {
            let mut conn = db.get_connection()?;
            f(&mut conn, now)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, op: NewOperation) -> Result<OperationRecord> {
        op.validate()?;
        self.blocking(move |conn, now| insert_operation(conn, op, now)).await
    }

    async fn get(&self, id: &str) -> Result<Option<OperationRecord>> {
        let id = id.to_owned();
        self.blocking(move |conn, _| {
            conn.query_optional(
                &format!("SELECT {RECORD_COLUMNS} FROM sync_operations WHERE id = ?1"),
                params![id],
                map_record_row,
            )
            .map_err(map_storage_error)
        })
        .await
    }

    async fn next_batch(
        &self,
        max_priority: Option<i32>,
        limit: usize,
    ) -> Result<Vec<OperationRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = usize_to_i64(limit);
        self.blocking(move |conn, _| {
            query_records(
                conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM sync_operations
                     WHERE status = 'pending' AND (?1 IS NULL OR priority <= ?1)
                     ORDER BY priority, created_at, seq
                     LIMIT ?2"
                ),
                params![max_priority, limit],
            )
        })
        .await
    }

    async fn lowest_pending_priority(&self) -> Result<Option<i32>> {
        self.blocking(|conn, _| {
            conn.query_row(
                "SELECT MIN(priority) FROM sync_operations WHERE status = 'pending'",
                &[],
                |row| row.get(0),
            )
            .map_err(map_storage_error)
        })
        .await
    }

    async fn mark_in_flight(&self, id: &str) -> Result<bool> {
        let id = id.to_owned();
        self.blocking(move |conn, now| {
            let changed = conn
                .execute(
                    "UPDATE sync_operations SET status = 'in_flight', started_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    params![id, now],
                )
                .map_err(map_storage_error)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn mark_completed(&self, id: &str, remote_id: Option<&str>) -> Result<()> {
        let id = id.to_owned();
        let remote_id = remote_id.map(str::to_owned);
        self.blocking(move |conn, now| {
            let tx = conn.transaction().map_err(map_storage_error)?;
            let changed = tx
                .execute(
                    "UPDATE sync_operations
                     SET status = 'completed', processed_at = ?2, last_error = NULL,
                         remote_id = COALESCE(?3, remote_id)
                     WHERE id = ?1 AND status = 'in_flight'",
                    params![id, now, remote_id],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(invalid_transition(&tx, &id, OperationStatus::Completed));
            }

            if let Some(remote_id) = remote_id {
                let (entity_type, entity_id, kind): (String, String, String) = tx
                    .query_row(
                        "SELECT entity_type, entity_id, kind FROM sync_operations WHERE id = ?1",
                        params![id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .map_err(map_sql_error)?;
                if kind == OperationKind::Create.as_str() {
                    let mapping =
                        IdMapping::new(EntityType::new(entity_type)?, entity_id, remote_id, now);
                    upsert_mapping(&tx, &mapping).map_err(map_sql_error)?;
                }
            }

            tx.commit().map_err(map_sql_error)
        })
        .await
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let id = id.to_owned();
        let error = error.to_owned();
        self.blocking(move |conn, _| {
            let changed = conn
                .execute(
                    "UPDATE sync_operations
                     SET status = 'failed', retry_count = retry_count + 1,
                         lifetime_failures = lifetime_failures + 1, last_error = ?2
                     WHERE id = ?1 AND status = 'in_flight'",
                    params![id, error],
                )
                .map_err(map_storage_error)?;
            if changed == 0 {
                return Err(invalid_transition(conn, &id, OperationStatus::Failed));
            }
            Ok(())
        })
        .await
    }

    async fn release(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.blocking(move |conn, _| {
            let changed = conn
                .execute(
                    "UPDATE sync_operations SET status = 'pending', started_at = NULL
                     WHERE id = ?1 AND status = 'in_flight'",
                    params![id],
                )
                .map_err(map_storage_error)?;
            if changed == 0 {
                return Err(invalid_transition(conn, &id, OperationStatus::Pending));
            }
            Ok(())
        })
        .await
    }

    async fn reset_failed(&self, filter: &ResetFilter) -> Result<u64> {
        let filter = filter.clone();
        self.blocking(move |conn, _| {
            let tx = conn.transaction().map_err(map_storage_error)?;
            let entity_type = filter.entity_type.as_ref().map(ToString::to_string);

            let failed = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {RECORD_COLUMNS} FROM sync_operations
                         WHERE status = 'failed' AND (?1 IS NULL OR entity_type = ?1)
                         ORDER BY seq"
                    ))
                    .map_err(map_sql_error)?;
                let rows = stmt
                    .query_map(params![entity_type], map_record_row)
                    .map_err(map_sql_error)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)?
            };

            // Newest failure per key; ordered by seq so later rows win. The
            // filter only applies to that record, never to older ones it
            // superseded.
            let mut newest: HashMap<(EntityType, String, OperationKind), OperationRecord> =
                HashMap::new();
            for record in failed {
                newest.insert(
                    (record.entity_type.clone(), record.entity_id.clone(), record.kind),
                    record,
                );
            }

            let mut reset = 0_u64;
            for ((entity_type, entity_id, kind), record) in newest {
                if !filter.matches(&record) {
                    continue;
                }
                let active: bool = tx
                    .query_row(
                        "SELECT EXISTS (
                             SELECT 1 FROM sync_operations
                             WHERE entity_type = ?1 AND entity_id = ?2 AND kind = ?3
                               AND status IN ('pending', 'in_flight'))",
                        params![entity_type.as_str(), entity_id, kind.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(map_sql_error)?;
                if active {
                    debug!(
                        operation_id = %record.id,
                        entity_type = %entity_type,
                        entity_id = %entity_id,
                        "skipping reset, key already active"
                    );
                    continue;
                }

                let changed = tx
                    .execute(
                        "UPDATE sync_operations
                         SET status = 'pending', retry_count = 0, last_error = NULL,
                             started_at = NULL
                         WHERE id = ?1 AND status = 'failed'",
                        params![record.id],
                    )
                    .map_err(map_sql_error)?;
                reset += changed as u64;
            }

            tx.commit().map_err(map_sql_error)?;
            if reset > 0 {
                info!(reset, "reset failed operations to pending");
            }
            Ok(reset)
        })
        .await
    }

    async fn refresh_pending_payload(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        kind: OperationKind,
        payload: &Value,
    ) -> Result<bool> {
        let entity_type = entity_type.to_string();
        let entity_id = entity_id.to_owned();
        let payload = serde_json::to_string(payload)?;
        self.blocking(move |conn, _| {
            let changed = conn
                .execute(
                    "UPDATE sync_operations SET payload = ?4
                     WHERE entity_type = ?1 AND entity_id = ?2 AND kind = ?3
                       AND status = 'pending'",
                    params![entity_type, entity_id, kind.as_str(), payload],
                )
                .map_err(map_storage_error)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn find_by_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Vec<OperationRecord>> {
        let entity_type = entity_type.to_string();
        let entity_id = entity_id.to_owned();
        self.blocking(move |conn, _| {
            query_records(
                conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM sync_operations
                     WHERE entity_type = ?1 AND entity_id = ?2
                     ORDER BY seq DESC"
                ),
                params![entity_type, entity_id],
            )
        })
        .await
    }

    async fn list_by_status(
        &self,
        status: OperationStatus,
        entity_type: Option<&EntityType>,
        limit: usize,
    ) -> Result<Vec<OperationRecord>> {
        let entity_type = entity_type.map(ToString::to_string);
        let limit = usize_to_i64(limit);
        self.blocking(move |conn, _| {
            query_records(
                conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM sync_operations
                     WHERE status = ?1 AND (?2 IS NULL OR entity_type = ?2)
                     ORDER BY seq
                     LIMIT ?3"
                ),
                params![status.as_str(), entity_type, limit],
            )
        })
        .await
    }

    async fn completed_creates(
        &self,
        entity_type: Option<&EntityType>,
    ) -> Result<Vec<OperationRecord>> {
        let entity_type = entity_type.map(ToString::to_string);
        self.blocking(move |conn, _| {
            query_records(
                conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM sync_operations
                     WHERE status = 'completed' AND kind = 'create'
                       AND (?1 IS NULL OR entity_type = ?1)
                     ORDER BY seq DESC"
                ),
                params![entity_type],
            )
        })
        .await
    }

    async fn reprioritize(&self, entity_type: &EntityType, priority: i32) -> Result<u64> {
        if priority < 0 {
            return Err(OffsyncError::InvalidInput(format!(
                "priority must be non-negative, got {priority}"
            )));
        }
        let entity_type = entity_type.to_string();
        self.blocking(move |conn, _| {
            let changed = conn
                .execute(
                    "UPDATE sync_operations SET priority = ?2
                     WHERE status = 'pending' AND entity_type = ?1 AND priority <> ?2",
                    params![entity_type, priority],
                )
                .map_err(map_storage_error)?;
            Ok(changed as u64)
        })
        .await
    }

    async fn recover_stale_in_flight(&self, older_than: Duration) -> Result<u64> {
        let age = duration_millis(older_than);
        self.blocking(move |conn, now| {
            let cutoff = now.saturating_sub(age);
            let changed = conn
                .execute(
                    "UPDATE sync_operations
                     SET status = 'failed', retry_count = retry_count + 1,
                         lifetime_failures = lifetime_failures + 1, last_error = ?2
                     WHERE status = 'in_flight' AND (started_at IS NULL OR started_at <= ?1)",
                    params![cutoff, STALE_IN_FLIGHT_ERROR],
                )
                .map_err(map_storage_error)?;
            Ok(changed as u64)
        })
        .await
    }

    async fn purge_completed(&self, older_than: Duration) -> Result<u64> {
        let age = duration_millis(older_than);
        self.blocking(move |conn, now| {
            let cutoff = now.saturating_sub(age);
            let changed = conn
                .execute(
                    "DELETE FROM sync_operations
                     WHERE status = 'completed'
                       AND processed_at IS NOT NULL AND processed_at <= ?1
                       AND (kind <> 'create' OR EXISTS (
                           SELECT 1 FROM id_mappings m
                           WHERE m.entity_type = sync_operations.entity_type
                             AND m.entity_id = sync_operations.entity_id))",
                    params![cutoff],
                )
                .map_err(map_storage_error)?;
            Ok(changed as u64)
        })
        .await
    }

    async fn status_summary(&self) -> Result<StatusSummary> {
        self.blocking(|conn, _| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_type, status, COUNT(*) FROM sync_operations
                     GROUP BY entity_type, status",
                )
                .map_err(map_storage_error)?;
            let rows: Vec<(String, String, i64)> = stmt
                .query_map(&[], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .map_err(map_storage_error)?;

            let mut summary = StatusSummary::default();
            for (entity_type, status, count) in rows {
                let status = status.parse::<OperationStatus>().map_err(OffsyncError::Database)?;
                summary.add(&entity_type, status, u64::try_from(count).unwrap_or(0));
            }
            Ok(summary)
        })
        .await
    }

    async fn failed_summary(&self) -> Result<Vec<FailedEntitySummary>> {
        self.blocking(|conn, _| {
            let mut stmt = conn
                .prepare(
                    "SELECT f.entity_type, COUNT(*), MAX(f.retry_count),
                            (SELECT l.last_error FROM sync_operations l
                             WHERE l.entity_type = f.entity_type AND l.status = 'failed'
                             ORDER BY l.seq DESC LIMIT 1)
                     FROM sync_operations f
                     WHERE f.status = 'failed'
                     GROUP BY f.entity_type
                     ORDER BY f.entity_type",
                )
                .map_err(map_storage_error)?;
            stmt.query_map(&[], |row| {
                Ok(FailedEntitySummary {
                    entity_type: row.get(0)?,
                    count: row.get::<_, i64>(1).map(|c| u64::try_from(c).unwrap_or(0))?,
                    max_retry_count: row.get(2)?,
                    last_error: row.get(3)?,
                })
            })
            .map_err(map_storage_error)
        })
        .await
    }
}

// ============================================================================
// Queries
// ============================================================================

fn insert_operation(
    conn: &SqliteConnection,
    op: NewOperation,
    now: i64,
) -> Result<OperationRecord> {
    let mut record = OperationRecord::from_new(op, now, 0);
    let payload = serde_json::to_string(&record.payload)?;

    match conn.execute(
        "INSERT INTO sync_operations
             (id, entity_type, entity_id, kind, payload, priority, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.entity_type.as_str(),
            record.entity_id,
            record.kind.as_str(),
            payload,
            record.priority,
            record.status.as_str(),
            record.created_at
        ],
    ) {
        Ok(_) => {}
        Err(err) if err.is_unique_violation() => {
            return Err(OffsyncError::DuplicateOperation {
                entity_type: record.entity_type,
                entity_id: record.entity_id,
                kind: record.kind,
            });
        }
        Err(err) => return Err(map_storage_error(err)),
    }

    record.seq = conn.last_insert_rowid();
    debug!(
        operation_id = %record.id,
        entity_type = %record.entity_type,
        entity_id = %record.entity_id,
        kind = %record.kind,
        priority = record.priority,
        "enqueued operation"
    );
    Ok(record)
}

fn query_records(
    conn: &SqliteConnection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<OperationRecord>> {
    let mut stmt = conn.prepare(sql).map_err(map_storage_error)?;
    stmt.query_map(params, map_record_row).map_err(map_storage_error)
}

/// Error for a failed compare-and-set, naming the record's actual status.
fn invalid_transition(conn: &Connection, id: &str, to: OperationStatus) -> OffsyncError {
    let current: rusqlite::Result<Option<String>> = conn
        .query_row("SELECT status FROM sync_operations WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional();
    match current {
        Ok(Some(status)) => OffsyncError::InvalidTransition(format!(
            "operation {id} is {status}, cannot move to {to}"
        )),
        Ok(None) => OffsyncError::NotFound(format!("operation {id}")),
        Err(err) => map_sql_error(err),
    }
}

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<OperationRecord> {
    let entity_type: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let payload: String = row.get(4)?;
    let status: String = row.get(6)?;

    Ok(OperationRecord {
        id: row.get(0)?,
        entity_type: EntityType::new(&entity_type)
            .map_err(|err| conversion_error(1, Box::new(err)))?,
        entity_id: row.get(2)?,
        kind: kind.parse().map_err(|err: String| conversion_error(3, err.into()))?,
        payload: serde_json::from_str(&payload)
            .map_err(|err| conversion_error(4, Box::new(err)))?,
        priority: row.get(5)?,
        status: status.parse().map_err(|err: String| conversion_error(6, err.into()))?,
        retry_count: row.get(7)?,
        lifetime_failures: row.get(8)?,
        last_error: row.get(9)?,
        remote_id: row.get(10)?,
        created_at: row.get(11)?,
        started_at: row.get(12)?,
        processed_at: row.get(13)?,
        seq: row.get(14)?,
    })
}

fn conversion_error(
    column: usize,
    err: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err)
}

fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
