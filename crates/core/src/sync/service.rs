//! Mutation intake and operator operations

use std::sync::Arc;

use offsync_common::{Clock, SystemClock};
use offsync_domain::constants::MAX_LIST_LIMIT;
use offsync_domain::{
    EntityType, FailedEntitySummary, IdMapping, NewOperation, OffsyncError, OperationKind,
    OperationRecord, OperationStatus, ResetFilter, Result, StatusSummary, SyncSchema,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::ports::{IdMappingRepository, LocalStore, QueueStore};

/// Result of recording a local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// A new pending record.
    Enqueued(OperationRecord),
    /// Folded into the pending record for the same key, whose payload now
    /// carries the newer snapshot.
    Coalesced { entity_type: EntityType, entity_id: String, kind: OperationKind },
}

impl MutationOutcome {
    pub fn is_coalesced(&self) -> bool {
        matches!(self, Self::Coalesced { .. })
    }
}

/// Outcome of a full resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    /// Creates queued.
    pub enqueued: usize,
    /// Already known remotely (mapping or completed create).
    pub skipped_mapped: usize,
    /// A create is already queued.
    pub skipped_active: usize,
    /// Listed locally but the snapshot read came back empty.
    pub missing_snapshot: usize,
}

/// Writes `entity_id` into `payload[id_field]`.
pub(crate) fn embed_id(payload: &mut Value, id_field: &str, entity_id: &str) -> Result<()> {
    match payload {
        Value::Object(map) => {
            map.insert(id_field.to_owned(), Value::String(entity_id.to_owned()));
            Ok(())
        }
        _ => Err(OffsyncError::InvalidInput(format!(
            "payload for {entity_id} must be a JSON object"
        ))),
    }
}

/// Entry point for the local store and for operators.
pub struct SyncService {
    store: Arc<dyn QueueStore>,
    mappings: Arc<dyn IdMappingRepository>,
    local: Arc<dyn LocalStore>,
    schema: Arc<SyncSchema>,
    clock: Arc<dyn Clock>,
}

impl SyncService {
    /// Construct a service over the given ports, using the system clock.
    pub fn new(
        store: Arc<dyn QueueStore>,
        mappings: Arc<dyn IdMappingRepository>,
        local: Arc<dyn LocalStore>,
        schema: Arc<SyncSchema>,
    ) -> Self {
        Self { store, mappings, local, schema, clock: Arc::new(SystemClock) }
    }

    /// Replace the clock stamped on new records.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    /// Enqueues a local mutation.
    ///
    /// Creates and updates carry the entity id under the schema's id field;
    /// the priority comes from the schema. A second mutation for a key that
    /// is still pending refreshes that record instead of adding another.
    #[instrument(skip(self, payload), fields(entity_type = %entity_type, kind = %kind))]
    pub async fn record_mutation(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        kind: OperationKind,
        mut payload: Value,
    ) -> Result<MutationOutcome> {
        let spec = self.schema.get(entity_type).ok_or_else(|| {
            OffsyncError::InvalidInput(format!("entity type '{entity_type}' is not synchronized"))
        })?;

        if !payload.is_object() {
            return Err(OffsyncError::InvalidInput(format!(
                "payload for {entity_type}/{entity_id} must be a JSON object"
            )));
        }
        if kind != OperationKind::Delete {
            embed_id(&mut payload, &spec.id_field, entity_id)?;
        }

        let op = NewOperation::new(entity_type.clone(), entity_id, kind, payload, spec.priority);
        match self.store.enqueue(op.clone()).await {
            Ok(record) => {
                debug!(operation_id = %record.id, entity_id, "mutation enqueued");
                Ok(MutationOutcome::Enqueued(record))
            }
            Err(err) if err.is_duplicate() => {
                let refreshed = self
                    .store
                    .refresh_pending_payload(entity_type, entity_id, kind, &op.payload)
                    .await?;
                if refreshed {
                    debug!(entity_id, "mutation coalesced into pending operation");
                    Ok(MutationOutcome::Coalesced {
                        entity_type: entity_type.clone(),
                        entity_id: entity_id.to_owned(),
                        kind,
                    })
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Record counts by status and entity type.
    pub async fn status_summary(&self) -> Result<StatusSummary> {
        self.store.status_summary().await
    }

    pub async fn failed_summary(&self) -> Result<Vec<FailedEntitySummary>> {
        self.store.failed_summary().await
    }

    /// Pending records in dispatch order.
    pub async fn pending(&self, limit: usize) -> Result<Vec<OperationRecord>> {
        self.store.next_batch(None, limit.min(MAX_LIST_LIMIT)).await
    }

    /// Failed records, oldest first.
    pub async fn failed(&self, limit: usize) -> Result<Vec<OperationRecord>> {
        self.store.list_by_status(OperationStatus::Failed, None, limit.min(MAX_LIST_LIMIT)).await
    }

    /// History of one entity, newest first.
    pub async fn find(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Vec<OperationRecord>> {
        self.store.find_by_entity(entity_type, entity_id).await
    }

    /// Operator-triggered `failed -> pending` transition.
    #[instrument(skip(self))]
    pub async fn reset_failed(&self, filter: &ResetFilter) -> Result<u64> {
        let reset = self.store.reset_failed(filter).await?;
        info!(reset, "failed operations reset");
        Ok(reset)
    }

    /// Manual priority reconfiguration for pending records of a type.
    #[instrument(skip(self))]
    pub async fn reprioritize(&self, entity_type: &EntityType, priority: i32) -> Result<u64> {
        if priority < 0 {
            return Err(OffsyncError::InvalidInput(format!(
                "priority must be non-negative, got {priority}"
            )));
        }
        if let Some(configured) = self.schema.priority_of(entity_type) {
            if configured != priority {
                warn!(configured, priority, "priority differs from the configured class");
            }
        }
        let changed = self.store.reprioritize(entity_type, priority).await?;
        info!(changed, "pending operations reprioritized");
        Ok(changed)
    }

    /// Rewrites pending priorities to the configured schema classes.
    #[instrument(skip(self))]
    pub async fn apply_schema_priorities(&self) -> Result<u64> {
        let mut changed = 0;
        for spec in &self.schema.entities {
            changed += self.store.reprioritize(&spec.entity_type, spec.priority).await?;
        }
        info!(changed, "schema priorities applied");
        Ok(changed)
    }

    /// Enqueues a create for every local entity the remote side does not
    /// know yet, parents first.
    #[instrument(skip(self))]
    pub async fn queue_full_resync(&self) -> Result<ResyncReport> {
        let mut report = ResyncReport::default();

        for spec in self.schema.dependency_order() {
            let entity_type = &spec.entity_type;
            for entity_id in self.local.entity_ids(entity_type).await? {
                if self.mappings.get(entity_type, &entity_id).await?.is_some() {
                    report.skipped_mapped += 1;
                    continue;
                }

                let creates: Vec<OperationRecord> = self
                    .store
                    .find_by_entity(entity_type, &entity_id)
                    .await?
                    .into_iter()
                    .filter(OperationRecord::is_create)
                    .collect();
                if creates.iter().any(|r| r.status == OperationStatus::Completed) {
                    report.skipped_mapped += 1;
                    continue;
                }
                if creates.iter().any(|r| r.status.is_active()) {
                    report.skipped_active += 1;
                    continue;
                }

                let Some(mut payload) = self.local.snapshot(entity_type, &entity_id).await? else {
                    report.missing_snapshot += 1;
                    continue;
                };
                embed_id(&mut payload, &spec.id_field, &entity_id)?;

                let op = NewOperation::new(
                    entity_type.clone(),
                    entity_id.as_str(),
                    OperationKind::Create,
                    payload,
                    spec.priority,
                );
                match self.store.enqueue(op).await {
                    Ok(_) => report.enqueued += 1,
                    Err(err) if err.is_duplicate() => report.skipped_active += 1,
                    Err(err) => return Err(err),
                }
            }
        }

        info!(
            enqueued = report.enqueued,
            skipped_mapped = report.skipped_mapped,
            skipped_active = report.skipped_active,
            missing_snapshot = report.missing_snapshot,
            "full resync queued"
        );
        Ok(report)
    }

    /// Records an operator-resolved remote identifier for an entity.
    #[instrument(skip(self))]
    pub async fn record_alias(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        remote_id: &str,
    ) -> Result<IdMapping> {
        if remote_id.trim().is_empty() {
            return Err(OffsyncError::InvalidInput("remote id must not be empty".into()));
        }
        if let Some(existing) = self.mappings.get(entity_type, entity_id).await? {
            if existing.remote_id != remote_id {
                warn!(previous = %existing.remote_id, remote_id, "replacing divergent mapping");
            }
        }

        let mapping =
            IdMapping::new(entity_type.clone(), entity_id, remote_id, self.clock.now_millis());
        self.mappings.upsert(&mapping).await?;
        info!(entity_id, remote_id, "alias recorded");
        Ok(mapping)
    }

    /// Known id mappings, optionally for one entity type.
    pub async fn mappings(&self, entity_type: Option<&EntityType>) -> Result<Vec<IdMapping>> {
        self.mappings.list(entity_type).await
    }
}
