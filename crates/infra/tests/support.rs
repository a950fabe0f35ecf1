use std::time::Duration;

use offsync_domain::{AppConfig, EntityType, OperationStatus};
use offsync_infra::SyncEngine;
use tempfile::TempDir;

/// Local point-of-sale tables the engine reads snapshots from.
pub const LOCAL_TABLES: &str = "
    CREATE TABLE customers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        loyalty_points INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE sales (
        id TEXT PRIMARY KEY,
        customer_id TEXT REFERENCES customers(id),
        total REAL NOT NULL
    );
";

/// Engine backed by a throwaway database; the directory lives as long as
/// the harness.
pub struct TestEngine {
    pub engine: SyncEngine,
    _temp_dir: TempDir,
}

impl TestEngine {
    /// Engine pointed at `base_url` with fast in-cycle retries.
    pub fn new(base_url: &str) -> Self {
        Self::with_config(base_url, |_| {})
    }

    pub fn with_config(base_url: &str, customize: impl FnOnce(&mut AppConfig)) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");

        let mut config = AppConfig::default();
        config.database.path = temp_dir.path().join("offsync.db");
        config.database.pool_size = 4;
        config.remote.base_url = base_url.to_owned();
        config.remote.timeout_secs = 5;
        config.dispatch.retry_base_delay_ms = 1;
        config.dispatch.retry_max_delay_ms = 5;
        config.dispatch.max_in_cycle_attempts = 2;
        customize(&mut config);

        let engine = SyncEngine::open(config).expect("engine should open");
        engine
            .db
            .get_connection()
            .expect("connection should be available")
            .execute_batch(LOCAL_TABLES)
            .expect("local tables should be created");

        Self { engine, _temp_dir: temp_dir }
    }

    /// Execute a batch of SQL statements against the engine database.
    pub fn execute_batch(&self, sql: &str) {
        let conn = self
            .engine
            .db
            .get_connection()
            .expect("connection should be available for execute_batch");
        conn.execute_batch(sql).expect("SQL batch execution should succeed");
    }

    /// Status of the newest record for an entity, if any.
    pub async fn latest_status(&self, entity: &str, id: &str) -> Option<OperationStatus> {
        self.engine
            .service
            .find(&t(entity), id)
            .await
            .expect("find should succeed")
            .into_iter()
            .max_by_key(|r| r.seq)
            .map(|r| r.status)
    }

    /// Poll until every record is completed or `timeout` elapses.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            let summary =
                self.engine.service.status_summary().await.expect("summary should load");
            if summary.total > 0 && summary.count(OperationStatus::Completed) == summary.total {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }
}

pub fn t(name: &str) -> EntityType {
    EntityType::new(name).expect("valid entity type")
}
