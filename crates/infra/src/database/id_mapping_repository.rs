//! SQLite-backed identifier mapping repository.

use std::sync::Arc;

use async_trait::async_trait;
use offsync_core::IdMappingRepository;
use offsync_domain::{EntityType, IdMapping, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use tracing::warn;

use super::manager::{map_join_error, map_sql_error, map_storage_error, DbManager};

/// Identifier mappings stored next to the queue.
pub struct SqliteIdMappingRepository {
    db: Arc<DbManager>,
}

impl SqliteIdMappingRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdMappingRepository for SqliteIdMappingRepository {
    async fn get(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<IdMapping>> {
        let db = Arc::clone(&self.db);
        let entity_type = entity_type.to_string();
        let entity_id = entity_id.to_owned();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            query_mapping(&conn, &entity_type, &entity_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn upsert(&self, mapping: &IdMapping) -> Result<()> {
        let db = Arc::clone(&self.db);
        let mapping = mapping.clone();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            upsert_mapping(&conn, &mapping).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_by_remote(
        &self,
        entity_type: &EntityType,
        remote_id: &str,
    ) -> Result<Option<IdMapping>> {
        let db = Arc::clone(&self.db);
        let entity_type = entity_type.to_string();
        let remote_id = remote_id.to_owned();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.query_optional(
                "SELECT entity_type, entity_id, remote_id, updated_at FROM id_mappings
                 WHERE entity_type = ?1 AND remote_id = ?2
                 ORDER BY updated_at DESC LIMIT 1",
                params![entity_type, remote_id],
                map_mapping_row,
            )
            .map_err(map_storage_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, entity_type: Option<&EntityType>) -> Result<Vec<IdMapping>> {
        let db = Arc::clone(&self.db);
        let entity_type = entity_type.map(ToString::to_string);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT entity_type, entity_id, remote_id, updated_at FROM id_mappings
                     WHERE (?1 IS NULL OR entity_type = ?1)
                     ORDER BY entity_type, entity_id",
                )
                .map_err(map_storage_error)?;
            stmt.query_map(params![entity_type], map_mapping_row).map_err(map_storage_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// Queries
// ============================================================================

fn query_mapping(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> rusqlite::Result<Option<IdMapping>> {
    conn.query_row(
        "SELECT entity_type, entity_id, remote_id, updated_at FROM id_mappings
         WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type, entity_id],
        map_mapping_row,
    )
    .optional()
}

/// Insert or overwrite a mapping; newest wins.
///
/// Shared with the queue store so a create's mapping lands in the same
/// transaction as its completion.
pub(crate) fn upsert_mapping(conn: &Connection, mapping: &IdMapping) -> rusqlite::Result<()> {
    let previous: Option<String> = conn
        .query_row(
            "SELECT remote_id FROM id_mappings WHERE entity_type = ?1 AND entity_id = ?2",
            params![mapping.entity_type.as_str(), mapping.entity_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(previous) = previous.filter(|p| p != &mapping.remote_id) {
        warn!(
            entity_type = %mapping.entity_type,
            entity_id = %mapping.entity_id,
            previous_remote_id = %previous,
            remote_id = %mapping.remote_id,
            "overwriting divergent id mapping"
        );
    }

    conn.execute(
        "INSERT INTO id_mappings (entity_type, entity_id, remote_id, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (entity_type, entity_id)
         DO UPDATE SET remote_id = excluded.remote_id, updated_at = excluded.updated_at",
        params![
            mapping.entity_type.as_str(),
            mapping.entity_id,
            mapping.remote_id,
            mapping.updated_at
        ],
    )?;
    Ok(())
}

fn map_mapping_row(row: &Row<'_>) -> rusqlite::Result<IdMapping> {
    let entity_type: String = row.get(0)?;
    let entity_type = EntityType::new(&entity_type)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err)))?;

    Ok(IdMapping {
        entity_type,
        entity_id: row.get(1)?,
        remote_id: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
