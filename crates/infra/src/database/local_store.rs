//! Read-only snapshots of the application's own SQLite tables.
//!
//! Rows become JSON objects keyed in camelCase so re-derived snapshots match
//! the payloads the application enqueues.

use std::sync::Arc;

use async_trait::async_trait;
use offsync_common::storage::SqliteConnection;
use offsync_core::LocalStore;
use offsync_domain::{EntityType, OffsyncError, Result, SyncSchema};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::params;
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};
use tokio::task;
use tracing::debug;

use super::manager::{map_join_error, map_storage_error, DbManager};

static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("IDENTIFIER_REGEX should compile")
});

/// [`LocalStore`] over the tables named by the sync schema.
pub struct SqliteLocalStore {
    db: Arc<DbManager>,
    schema: Arc<SyncSchema>,
}

impl SqliteLocalStore {
    /// Construct a reader over the local tables named in `schema`.
    pub fn new(db: Arc<DbManager>, schema: Arc<SyncSchema>) -> Self {
        Self { db, schema }
    }

    /// Table and id column for a type, `None` for types outside the schema.
    fn target(&self, entity_type: &EntityType) -> Result<Option<(String, String)>> {
        let Some(spec) = self.schema.get(entity_type) else {
            return Ok(None);
        };
        let table = spec.table_name();
        let column = camel_to_snake(&spec.id_field);
        for identifier in [&table, &column] {
            if !IDENTIFIER_REGEX.is_match(identifier) {
                return Err(OffsyncError::Config(format!(
                    "'{identifier}' is not a valid SQL identifier for {entity_type}"
                )));
            }
        }
        Ok(Some((table, column)))
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn snapshot(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<Value>> {
        let Some((table, column)) = self.target(entity_type)? else {
            debug!(entity_type = %entity_type, "no local table for entity type");
            return Ok(None);
        };
        let db = Arc::clone(&self.db);
        let entity_id = entity_id.to_owned();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            if !table_exists(&conn, &table)? {
                debug!(table = %table, "local table missing");
                return Ok(None);
            }

            let mut stmt = conn
                .prepare(&format!("SELECT * FROM \"{table}\" WHERE \"{column}\" = ?1 LIMIT 1"))
                .map_err(map_storage_error)?;
            let columns = stmt.column_names();
            let rows = stmt
                .query_map(params![entity_id], |row| {
                    let mut object = Map::with_capacity(columns.len());
                    for (index, name) in columns.iter().enumerate() {
                        object.insert(snake_to_camel(name), sql_to_json(row.get_ref(index)?));
                    }
                    Ok(Value::Object(object))
                })
                .map_err(map_storage_error)?;
            Ok(rows.into_iter().next())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn entity_ids(&self, entity_type: &EntityType) -> Result<Vec<String>> {
        let Some((table, column)) = self.target(entity_type)? else {
            return Ok(Vec::new());
        };
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            if !table_exists(&conn, &table)? {
                debug!(table = %table, "local table missing");
                return Ok(Vec::new());
            }

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT \"{column}\" FROM \"{table}\" WHERE \"{column}\" IS NOT NULL ORDER BY rowid"
                ))
                .map_err(map_storage_error)?;
            let ids = stmt
                .query_map(&[], |row| Ok(sql_to_id(row.get_ref(0)?)))
                .map_err(map_storage_error)?;
            Ok(ids.into_iter().flatten().collect())
        })
        .await
        .map_err(map_join_error)?
    }
}

fn table_exists(conn: &SqliteConnection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)",
        params![table],
        |row| row.get(0),
    )
    .map_err(map_storage_error)
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

fn sql_to_id(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' && !out.is_empty() {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
