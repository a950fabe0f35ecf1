//! Queue reconciliation
//!
//! Audits the queue against the mapping table and the local store and
//! re-enqueues corrective records. Anything it cannot repair is returned as
//! an [`Escalation`] and logged at error level.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use offsync_common::{Clock, SystemClock};
use offsync_domain::constants::MAX_LIST_LIMIT;
use offsync_domain::{
    EntityType, IdMapping, NewOperation, OperationKind, OperationRecord, OperationStatus,
    ReconcileConfig, ResetFilter, Result,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use super::dependency::{latest_create, DependencyResolver};
use super::dispatcher::MissingParentReport;
use super::ports::{IdMappingRepository, LocalStore, QueueStore};
use super::service::embed_id;

const SECS_PER_DAY: u64 = 86_400;

/// What an escalation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// A completed create needs correcting but the local entity is gone.
    OrphanWithoutLocalEntity,
    /// A referenced parent was never enqueued and does not exist locally.
    MissingParentNotInLocalStore,
    /// Lifetime failures reached the configured ceiling.
    RetryCeilingExceeded,
    /// Validation error or unresolved conflict; needs payload correction.
    PermanentFailure,
}

offsync_domain::impl_domain_status_conversions!(EscalationKind {
    OrphanWithoutLocalEntity => "orphan_without_local_entity",
    MissingParentNotInLocalStore => "missing_parent_not_in_local_store",
    RetryCeilingExceeded => "retry_ceiling_exceeded",
    PermanentFailure => "permanent_failure",
});

/// An inconsistency that needs an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Escalation {
    pub kind: EscalationKind,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation_id: Option<String>,
    pub detail: String,
}

/// Counters for one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Completed creates re-enqueued with the entity id in the payload.
    pub orphans_requeued: usize,
    /// Mappings written from a completed create's remote id.
    pub mappings_backfilled: usize,
    /// Completed creates without any remote id, re-enqueued.
    pub mappings_requeued: usize,
    /// Missing parents enqueued from the local store.
    pub parents_enqueued: usize,
    pub failed_reset: u64,
    pub reprioritized: u64,
    /// Completed records removed by retention.
    pub purged: u64,
    pub escalations: Vec<Escalation>,
}

impl ReconcileReport {
    /// True when the run changed nothing and found nothing to escalate.
    pub fn is_clean(&self) -> bool {
        self.orphans_requeued == 0
            && self.mappings_backfilled == 0
            && self.mappings_requeued == 0
            && self.parents_enqueued == 0
            && self.failed_reset == 0
            && self.reprioritized == 0
            && self.escalations.is_empty()
    }

    fn escalate(&mut self, escalation: Escalation) {
        error!(
            kind = %escalation.kind,
            entity_type = %escalation.entity_type,
            entity_id = %escalation.entity_id,
            operation_id = escalation.operation_id.as_deref().unwrap_or("-"),
            detail = %escalation.detail,
            "sync inconsistency needs manual intervention"
        );
        self.escalations.push(escalation);
    }
}

/// A parent create to look for, and who asked.
struct ParentCandidate {
    parent_type: EntityType,
    parent_id: String,
    requested_by: String,
}

/// Repairs queue inconsistencies the dispatcher cannot fix on its own.
pub struct Reconciler {
    store: Arc<dyn QueueStore>,
    mappings: Arc<dyn IdMappingRepository>,
    local: Arc<dyn LocalStore>,
    resolver: DependencyResolver,
    config: ReconcileConfig,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    /// Construct a reconciler over the given ports, using the system clock.
    pub fn new(
        store: Arc<dyn QueueStore>,
        mappings: Arc<dyn IdMappingRepository>,
        local: Arc<dyn LocalStore>,
        resolver: DependencyResolver,
        config: ReconcileConfig,
    ) -> Self {
        Self { store, mappings, local, resolver, config, clock: Arc::new(SystemClock) }
    }

    /// Replace the clock used for retention cutoffs and new records.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Settings this reconciler was built with.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// One pass with no missing parents reported by dispatch.
    pub async fn run(&self) -> Result<ReconcileReport> {
        self.run_with(&[]).await
    }

    /// Full pass, also checking the missing parents a dispatch cycle
    /// reported.
    #[instrument(skip_all, fields(reported = reported.len()))]
    pub async fn run_with(&self, reported: &[MissingParentReport]) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        self.audit_orphan_payloads(&mut report).await?;
        self.audit_mappings(&mut report).await?;
        self.audit_missing_parents(reported, &mut report).await?;
        if self.config.sweep_failed {
            self.sweep_failed(&mut report).await?;
        }
        self.correct_priorities(&mut report).await?;
        if let Some(days) = self.config.retention_days {
            let older_than = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
            report.purged = self.store.purge_completed(older_than).await?;
        }

        info!(
            orphans_requeued = report.orphans_requeued,
            mappings_backfilled = report.mappings_backfilled,
            mappings_requeued = report.mappings_requeued,
            parents_enqueued = report.parents_enqueued,
            failed_reset = report.failed_reset,
            reprioritized = report.reprioritized,
            purged = report.purged,
            escalations = report.escalations.len(),
            "reconcile finished"
        );
        Ok(report)
    }

    /// Completed creates whose payload lacks the entity id get a corrected
    /// create built from the local snapshot.
    async fn audit_orphan_payloads(&self, report: &mut ReconcileReport) -> Result<()> {
        for record in self.newest_completed_creates().await? {
            let id_field = self.resolver.schema().id_field(&record.entity_type);
            if record.has_embedded_id(id_field) || self.superseded(&record).await? {
                continue;
            }

            if self.requeue_create(&record.entity_type, &record.entity_id).await? {
                debug!(operation_id = %record.id, "orphan payload requeued");
                report.orphans_requeued += 1;
            } else {
                report.escalate(Escalation {
                    kind: EscalationKind::OrphanWithoutLocalEntity,
                    entity_type: record.entity_type.clone(),
                    entity_id: record.entity_id.clone(),
                    operation_id: Some(record.id.clone()),
                    detail: format!("completed create has no '{id_field}' in its payload"),
                });
            }
        }
        Ok(())
    }

    /// Every completed create must resolve to a remote id through the
    /// mapping table.
    async fn audit_mappings(&self, report: &mut ReconcileReport) -> Result<()> {
        for record in self.newest_completed_creates().await? {
            if self.mappings.get(&record.entity_type, &record.entity_id).await?.is_some() {
                continue;
            }

            if let Some(remote_id) = &record.remote_id {
                let mapping = IdMapping::new(
                    record.entity_type.clone(),
                    record.entity_id.as_str(),
                    remote_id.as_str(),
                    self.clock.now_millis(),
                );
                self.mappings.upsert(&mapping).await?;
                report.mappings_backfilled += 1;
                continue;
            }

            if self.superseded(&record).await? {
                continue;
            }
            if self.requeue_create(&record.entity_type, &record.entity_id).await? {
                report.mappings_requeued += 1;
            } else {
                report.escalate(Escalation {
                    kind: EscalationKind::OrphanWithoutLocalEntity,
                    entity_type: record.entity_type.clone(),
                    entity_id: record.entity_id.clone(),
                    operation_id: Some(record.id.clone()),
                    detail: "completed create has no resolvable remote id".into(),
                });
            }
        }
        Ok(())
    }

    /// Enqueues parents that were never queued, repeating for the parents'
    /// own parents.
    async fn audit_missing_parents(
        &self,
        reported: &[MissingParentReport],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let mut seen: HashSet<(EntityType, String)> = HashSet::new();
        let mut candidates: Vec<ParentCandidate> = reported
            .iter()
            .map(|r| ParentCandidate {
                parent_type: r.parent_type.clone(),
                parent_id: r.parent_id.clone(),
                requested_by: r.operation_id.clone(),
            })
            .collect();

        let mut frontier = self
            .store
            .list_by_status(OperationStatus::Pending, None, MAX_LIST_LIMIT)
            .await?;
        let max_passes = self.resolver.schema().entities.len().max(1);

        for _ in 0..max_passes {
            for record in &frontier {
                let readiness = self
                    .resolver
                    .is_ready(record, self.store.as_ref(), self.mappings.as_ref())
                    .await?;
                candidates.extend(readiness.missing_parents().into_iter().map(|b| {
                    ParentCandidate {
                        parent_type: b.entity_type.clone(),
                        parent_id: b.entity_id.clone(),
                        requested_by: record.id.clone(),
                    }
                }));
            }

            let mut enqueued = Vec::new();
            for candidate in candidates.drain(..) {
                if !seen.insert((candidate.parent_type.clone(), candidate.parent_id.clone())) {
                    continue;
                }
                if let Some(record) = self.enqueue_missing_parent(&candidate, report).await? {
                    enqueued.push(record);
                }
            }

            if enqueued.is_empty() {
                break;
            }
            frontier = enqueued;
        }
        Ok(())
    }

    async fn enqueue_missing_parent(
        &self,
        candidate: &ParentCandidate,
        report: &mut ReconcileReport,
    ) -> Result<Option<OperationRecord>> {
        let (parent_type, parent_id) = (&candidate.parent_type, candidate.parent_id.as_str());

        // Resolved since it was reported.
        if self.mappings.get(parent_type, parent_id).await?.is_some()
            || latest_create(self.store.as_ref(), parent_type, parent_id).await?.is_some()
        {
            return Ok(None);
        }

        let Some(snapshot) = self.local.snapshot(parent_type, parent_id).await? else {
            report.escalate(Escalation {
                kind: EscalationKind::MissingParentNotInLocalStore,
                entity_type: parent_type.clone(),
                entity_id: parent_id.to_owned(),
                operation_id: Some(candidate.requested_by.clone()),
                detail: "referenced parent does not exist in the local store".into(),
            });
            return Ok(None);
        };

        let record = self.enqueue_create(parent_type, parent_id, snapshot).await?;
        if let Some(record) = &record {
            info!(
                parent_type = %parent_type,
                parent_id,
                requested_by = %candidate.requested_by,
                operation_id = %record.id,
                "missing parent enqueued"
            );
            report.parents_enqueued += 1;
        }
        Ok(record)
    }

    /// Escalates failed records that must not be retried automatically,
    /// then resets the rest.
    async fn sweep_failed(&self, report: &mut ReconcileReport) -> Result<()> {
        let ceiling = self.config.max_lifetime_failures;
        let failed =
            self.store.list_by_status(OperationStatus::Failed, None, MAX_LIST_LIMIT).await?;

        for record in failed {
            let kind = if record.lifetime_failures >= ceiling {
                EscalationKind::RetryCeilingExceeded
            } else if record.failed_permanently() {
                EscalationKind::PermanentFailure
            } else {
                continue;
            };
            if self.superseded(&record).await? {
                continue;
            }
            report.escalate(Escalation {
                kind,
                entity_type: record.entity_type.clone(),
                entity_id: record.entity_id.clone(),
                operation_id: Some(record.id.clone()),
                detail: format!(
                    "{} after {} failures",
                    record.last_error.as_deref().unwrap_or("failed"),
                    record.lifetime_failures
                ),
            });
        }

        let filter = ResetFilter::all().below_lifetime_failures(ceiling).retryable_only();
        report.failed_reset = self.store.reset_failed(&filter).await?;
        Ok(())
    }

    /// Pending priorities follow the configured classes; other statuses are
    /// left alone.
    async fn correct_priorities(&self, report: &mut ReconcileReport) -> Result<()> {
        for spec in &self.resolver.schema().entities {
            let changed = self.store.reprioritize(&spec.entity_type, spec.priority).await?;
            if changed > 0 {
                info!(
                    entity_type = %spec.entity_type,
                    priority = spec.priority,
                    changed,
                    "pending priorities corrected"
                );
            }
            report.reprioritized += changed;
        }
        Ok(())
    }

    /// Newest completed create per entity.
    async fn newest_completed_creates(&self) -> Result<Vec<OperationRecord>> {
        let mut seen = HashSet::new();
        Ok(self
            .store
            .completed_creates(None)
            .await?
            .into_iter()
            .filter(|r| seen.insert((r.entity_type.clone(), r.entity_id.clone())))
            .collect())
    }

    /// Whether a newer record of the same kind exists for the entity.
    async fn superseded(&self, record: &OperationRecord) -> Result<bool> {
        Ok(self
            .store
            .find_by_entity(&record.entity_type, &record.entity_id)
            .await?
            .iter()
            .any(|r| r.kind == record.kind && r.seq > record.seq))
    }

    /// Enqueues a corrected create from the local snapshot. Returns false
    /// when the local entity is gone.
    async fn requeue_create(&self, entity_type: &EntityType, entity_id: &str) -> Result<bool> {
        match self.local.snapshot(entity_type, entity_id).await? {
            Some(snapshot) => {
                self.enqueue_create(entity_type, entity_id, snapshot).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn enqueue_create(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        mut payload: serde_json::Value,
    ) -> Result<Option<OperationRecord>> {
        let schema = self.resolver.schema();
        embed_id(&mut payload, schema.id_field(entity_type), entity_id)?;
        let priority = schema.priority_of(entity_type).unwrap_or_default();

        let op = NewOperation::new(
            entity_type.clone(),
            entity_id,
            OperationKind::Create,
            payload,
            priority,
        );
        match self.store.enqueue(op).await {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_duplicate() => {
                debug!(entity_type = %entity_type, entity_id, "create already queued");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escalation() -> Escalation {
        Escalation {
            kind: EscalationKind::PermanentFailure,
            entity_type: EntityType::new("sale").unwrap(),
            entity_id: "s1".into(),
            operation_id: None,
            detail: "validation: total missing".into(),
        }
    }

    #[test]
    fn empty_report_is_clean() {
        let mut report = ReconcileReport::default();
        assert!(report.is_clean());

        report.purged = 4;
        assert!(report.is_clean());

        report.escalate(escalation());
        assert!(!report.is_clean());
        assert_eq!(report.escalations.len(), 1);
    }

    #[test]
    fn escalation_kind_serializes_snake_case() {
        let json = serde_json::to_value(escalation()).unwrap();
        assert_eq!(json["kind"], "permanent_failure");
        assert_eq!(EscalationKind::RetryCeilingExceeded.to_string(), "retry_ceiling_exceeded");
    }
}
