//! Port interfaces for sync operations

use std::time::Duration;

use async_trait::async_trait;
use offsync_domain::{
    EntityType, FailedEntitySummary, IdMapping, NewOperation, OperationKind, OperationRecord,
    OperationStatus, RemoteResult, ResetFilter, Result, StatusSummary,
};
use serde_json::Value;

/// Durable, queryable collection of operation records.
///
/// Every status change is a single-record compare-and-set; implementations
/// must keep at most one pending or in-flight record per
/// `(entity_type, entity_id, kind)`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a pending record.
    ///
    /// Fails with `DuplicateOperation` when the same key is already pending
    /// or in flight.
    async fn enqueue(&self, op: NewOperation) -> Result<OperationRecord>;

    async fn get(&self, id: &str) -> Result<Option<OperationRecord>>;

    /// Pending records ordered by priority, then age.
    async fn next_batch(&self, max_priority: Option<i32>, limit: usize)
        -> Result<Vec<OperationRecord>>;

    /// Lowest priority among pending records.
    async fn lowest_pending_priority(&self) -> Result<Option<i32>>;

    /// `pending -> in_flight`. Returns false if the record was not pending.
    async fn mark_in_flight(&self, id: &str) -> Result<bool>;

    /// `in_flight -> completed`; a create's remote id is mapped in the same
    /// transaction.
    async fn mark_completed(&self, id: &str, remote_id: Option<&str>) -> Result<()>;

    /// `in_flight -> failed`, counting the failure.
    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;

    /// `in_flight -> pending` without counting a failure.
    async fn release(&self, id: &str) -> Result<()>;

    /// Bulk `failed -> pending`, clearing `retry_count` and `last_error`.
    async fn reset_failed(&self, filter: &ResetFilter) -> Result<u64>;

    /// Replace the payload of the pending record for a key. Returns false
    /// when no such pending record exists.
    async fn refresh_pending_payload(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        kind: OperationKind,
        payload: &Value,
    ) -> Result<bool>;

    /// All records for an entity, newest first.
    async fn find_by_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Vec<OperationRecord>>;

    /// Records in one status, oldest first.
    async fn list_by_status(
        &self,
        status: OperationStatus,
        entity_type: Option<&EntityType>,
        limit: usize,
    ) -> Result<Vec<OperationRecord>>;

    /// Completed creates, newest first.
    async fn completed_creates(&self, entity_type: Option<&EntityType>)
        -> Result<Vec<OperationRecord>>;

    /// Rewrite the priority of pending records of a type. Returns the number
    /// of records changed.
    async fn reprioritize(&self, entity_type: &EntityType, priority: i32) -> Result<u64>;

    /// Fail in-flight records claimed longer ago than `older_than`.
    async fn recover_stale_in_flight(&self, older_than: Duration) -> Result<u64>;

    /// Delete completed records processed longer ago than `older_than`.
    /// Creates are kept unless their mapping exists.
    async fn purge_completed(&self, older_than: Duration) -> Result<u64>;

    async fn status_summary(&self) -> Result<StatusSummary>;

    async fn failed_summary(&self) -> Result<Vec<FailedEntitySummary>>;
}

/// `(entity_type, entity_id) -> remote_id` lookups
#[async_trait]
pub trait IdMappingRepository: Send + Sync {
    async fn get(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<IdMapping>>;

    /// Insert or overwrite; newest wins.
    async fn upsert(&self, mapping: &IdMapping) -> Result<()>;

    /// Reverse lookup by remote id
    async fn find_by_remote(
        &self,
        entity_type: &EntityType,
        remote_id: &str,
    ) -> Result<Option<IdMapping>>;

    async fn list(&self, entity_type: Option<&EntityType>) -> Result<Vec<IdMapping>>;

    async fn remote_id_for(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Option<String>> {
        Ok(self.get(entity_type, entity_id).await?.map(|m| m.remote_id))
    }
}

/// Read access to the originating local store
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Current snapshot of an entity as a JSON object, keyed the way
    /// payloads are.
    async fn snapshot(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<Value>>;

    /// Every local id of a type.
    async fn entity_ids(&self, entity_type: &EntityType) -> Result<Vec<String>>;
}

/// Boundary adapter performing the remote calls
#[async_trait]
pub trait RemoteApplier: Send + Sync {
    /// Create the entity, returning its remote identifier.
    async fn create(&self, entity_type: &EntityType, payload: &Value) -> RemoteResult<String>;

    async fn update(
        &self,
        entity_type: &EntityType,
        remote_id: &str,
        payload: &Value,
    ) -> RemoteResult<()>;

    async fn delete(&self, entity_type: &EntityType, remote_id: &str) -> RemoteResult<()>;

    async fn exists(&self, entity_type: &EntityType, remote_id: &str) -> RemoteResult<bool>;
}
