//! Dependency readiness checks
//!
//! Priority only orders the queue. Whether a record may actually be sent is
//! decided here: every parent referenced by the payload must have a durable
//! remote identifier before the child goes out.

use std::sync::Arc;

use offsync_domain::{
    EntityType, OperationKind, OperationRecord, OperationStatus, Result, SyncSchema,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::ports::{IdMappingRepository, QueueStore};

/// Why a record cannot be dispatched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// No create record and no mapping exist for the parent.
    MissingParent,
    ParentPending,
    ParentInFlight,
    ParentFailed,
    /// The parent's create completed without a resolvable remote id.
    ParentUnmapped,
}

offsync_domain::impl_domain_status_conversions!(BlockReason {
    MissingParent => "missing_parent",
    ParentPending => "parent_pending",
    ParentInFlight => "parent_in_flight",
    ParentFailed => "parent_failed",
    ParentUnmapped => "parent_unmapped",
});

impl BlockReason {
    fn from_status(status: OperationStatus) -> Self {
        match status {
            OperationStatus::Pending => Self::ParentPending,
            OperationStatus::InFlight => Self::ParentInFlight,
            OperationStatus::Failed => Self::ParentFailed,
            OperationStatus::Completed => Self::ParentUnmapped,
        }
    }
}

/// One unresolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedOn {
    /// Payload field holding the reference.
    pub field: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub reason: BlockReason,
}

/// A reference resolved to its remote identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedParent {
    pub field: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub remote_id: String,
}

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { parents: Vec<ResolvedParent> },
    Blocked(Vec<BlockedOn>),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Blocks caused by a parent that was never enqueued.
    pub fn missing_parents(&self) -> Vec<&BlockedOn> {
        match self {
            Self::Ready { .. } => Vec::new(),
            Self::Blocked(blocks) => {
                blocks.iter().filter(|b| b.reason == BlockReason::MissingParent).collect()
            }
        }
    }
}

enum ParentState {
    Resolved(String),
    Blocked(BlockReason),
}

/// Decides parent readiness from the entity schema, the queue and the
/// mapping table.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    schema: Arc<SyncSchema>,
}

impl DependencyResolver {
    /// Construct a resolver for the given entity schema.
    pub fn new(schema: Arc<SyncSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    /// Checks every parent reference of `record`.
    ///
    /// Null or absent references are optional and never block. A record
    /// also waits for any older pending or in-flight record of the same
    /// entity, and updates and deletes wait for their own entity's create
    /// when one is queued. Deletes do not look at parent fields.
    pub async fn is_ready(
        &self,
        record: &OperationRecord,
        store: &dyn QueueStore,
        mappings: &dyn IdMappingRepository,
    ) -> Result<Readiness> {
        let mut parents = Vec::new();
        let mut blocked = Vec::new();

        if let Some(reason) = self.own_entity_block(record, store).await? {
            blocked.push(BlockedOn {
                field: self.schema.id_field(&record.entity_type).to_owned(),
                entity_type: record.entity_type.clone(),
                entity_id: record.entity_id.clone(),
                reason,
            });
        }

        if record.kind != OperationKind::Delete {
            for (field, parent_type) in self.schema.parents_of(&record.entity_type) {
                let Some(parent_id) = record.reference(field) else {
                    continue;
                };
                match self.parent_state(parent_type, &parent_id, store, mappings).await? {
                    ParentState::Resolved(remote_id) => parents.push(ResolvedParent {
                        field: field.to_owned(),
                        entity_type: parent_type.clone(),
                        entity_id: parent_id,
                        remote_id,
                    }),
                    ParentState::Blocked(reason) => blocked.push(BlockedOn {
                        field: field.to_owned(),
                        entity_type: parent_type.clone(),
                        entity_id: parent_id,
                        reason,
                    }),
                }
            }
        }

        if blocked.is_empty() {
            Ok(Readiness::Ready { parents })
        } else {
            debug!(
                operation_id = %record.id,
                entity_type = %record.entity_type,
                entity_id = %record.entity_id,
                blocked = blocked.len(),
                "operation not ready"
            );
            Ok(Readiness::Blocked(blocked))
        }
    }

    /// Remote identifier to address an existing entity with.
    ///
    /// Mapping first, then the remote id stored on the latest completed
    /// create; when neither exists the remote side is assumed to have adopted
    /// the local id.
    pub async fn remote_id_for(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        store: &dyn QueueStore,
        mappings: &dyn IdMappingRepository,
    ) -> Result<String> {
        if let Some(remote_id) = mappings.remote_id_for(entity_type, entity_id).await? {
            return Ok(remote_id);
        }
        let from_create = latest_create(store, entity_type, entity_id)
            .await?
            .filter(|r| r.status == OperationStatus::Completed)
            .and_then(|r| r.remote_id);
        Ok(from_create.unwrap_or_else(|| entity_id.to_owned()))
    }

    /// Outgoing payload with each resolved parent field rewritten to the
    /// parent's remote id.
    ///
    /// A field that held a number keeps holding one when the remote id is
    /// numeric.
    pub fn translate_payload(&self, record: &OperationRecord, parents: &[ResolvedParent]) -> Value {
        let mut payload = record.payload.clone();
        if let Value::Object(map) = &mut payload {
            for parent in parents {
                let numeric = map.get(&parent.field).is_some_and(Value::is_number);
                map.insert(parent.field.clone(), remote_id_value(&parent.remote_id, numeric));
            }
        }
        payload
    }

    /// Operations on one entity go out one at a time, oldest first.
    async fn own_entity_block(
        &self,
        record: &OperationRecord,
        store: &dyn QueueStore,
    ) -> Result<Option<BlockReason>> {
        let history = store.find_by_entity(&record.entity_type, &record.entity_id).await?;

        let earlier_active = history
            .iter()
            .filter(|r| r.id != record.id && r.seq < record.seq && r.status.is_active())
            .min_by_key(|r| r.seq);
        if let Some(earlier) = earlier_active {
            return Ok(Some(BlockReason::from_status(earlier.status)));
        }

        if record.kind == OperationKind::Create {
            return Ok(None);
        }
        Ok(history
            .into_iter()
            .find(|r| r.is_create())
            .filter(|c| c.status != OperationStatus::Completed)
            .map(|c| BlockReason::from_status(c.status)))
    }

    async fn parent_state(
        &self,
        parent_type: &EntityType,
        parent_id: &str,
        store: &dyn QueueStore,
        mappings: &dyn IdMappingRepository,
    ) -> Result<ParentState> {
        let mapped = mappings.remote_id_for(parent_type, parent_id).await?;

        match latest_create(store, parent_type, parent_id).await? {
            Some(create) if create.status == OperationStatus::Completed => {
                match mapped.or(create.remote_id) {
                    Some(remote_id) => Ok(ParentState::Resolved(remote_id)),
                    None => Ok(ParentState::Blocked(BlockReason::ParentUnmapped)),
                }
            }
            Some(create) => Ok(ParentState::Blocked(BlockReason::from_status(create.status))),
            None => Ok(mapped.map_or(
                ParentState::Blocked(BlockReason::MissingParent),
                ParentState::Resolved,
            )),
        }
    }
}

/// Newest create record for an entity.
pub(crate) async fn latest_create(
    store: &dyn QueueStore,
    entity_type: &EntityType,
    entity_id: &str,
) -> Result<Option<OperationRecord>> {
    Ok(store.find_by_entity(entity_type, entity_id).await?.into_iter().find(|r| r.is_create()))
}

fn remote_id_value(remote_id: &str, numeric: bool) -> Value {
    match remote_id.parse::<i64>() {
        Ok(n) if numeric && n.to_string() == remote_id => Value::from(n),
        _ => Value::String(remote_id.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(entity_type: &str, payload: Value) -> OperationRecord {
        OperationRecord::from_new(
            offsync_domain::NewOperation::new(
                EntityType::new(entity_type).unwrap(),
                "local-1",
                OperationKind::Create,
                payload,
                2,
            ),
            1,
            1,
        )
    }

    fn parent(field: &str, remote_id: &str) -> ResolvedParent {
        ResolvedParent {
            field: field.into(),
            entity_type: EntityType::new("sale").unwrap(),
            entity_id: "s-local".into(),
            remote_id: remote_id.into(),
        }
    }

    #[test]
    fn translate_rewrites_parent_fields_only() {
        let resolver = DependencyResolver::new(Arc::new(SyncSchema::default()));
        let rec = record("sale_item", json!({"id": "local-1", "saleId": "s-local", "qty": 2}));

        let out = resolver.translate_payload(&rec, &[parent("saleId", "srv-9")]);

        assert_eq!(out, json!({"id": "local-1", "saleId": "srv-9", "qty": 2}));
        assert_eq!(rec.payload["saleId"], "s-local");
    }

    #[test]
    fn numeric_fields_stay_numeric() {
        let resolver = DependencyResolver::new(Arc::new(SyncSchema::default()));
        let numeric = record("sale_item", json!({"saleId": 7}));
        let text = record("sale_item", json!({"saleId": "7"}));

        let out = resolver.translate_payload(&numeric, &[parent("saleId", "1042")]);
        assert_eq!(out["saleId"], json!(1042));

        let out = resolver.translate_payload(&text, &[parent("saleId", "1042")]);
        assert_eq!(out["saleId"], json!("1042"));

        let out = resolver.translate_payload(&numeric, &[parent("saleId", "srv-1")]);
        assert_eq!(out["saleId"], json!("srv-1"));
    }

    #[test]
    fn block_reason_strings() {
        assert_eq!(BlockReason::MissingParent.to_string(), "missing_parent");
        assert_eq!("parent_in_flight".parse::<BlockReason>().unwrap(), BlockReason::ParentInFlight);
        assert_eq!(BlockReason::from_status(OperationStatus::Failed), BlockReason::ParentFailed);
    }

    #[test]
    fn missing_parents_filters_other_reasons() {
        let blocked = Readiness::Blocked(vec![
            BlockedOn {
                field: "saleId".into(),
                entity_type: EntityType::new("sale").unwrap(),
                entity_id: "s1".into(),
                reason: BlockReason::ParentPending,
            },
            BlockedOn {
                field: "productId".into(),
                entity_type: EntityType::new("product").unwrap(),
                entity_id: "p1".into(),
                reason: BlockReason::MissingParent,
            },
        ]);

        assert!(!blocked.is_ready());
        let missing = blocked.missing_parents();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].entity_id, "p1");
    }
}
