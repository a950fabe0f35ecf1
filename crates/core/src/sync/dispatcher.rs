//! Dispatch cycle
//!
//! One cycle pulls a batch of pending records, checks each against the
//! dependency resolver, claims the ready ones and replays them through the
//! remote applier. Every remote outcome ends as a queue transition; only
//! storage failures abort the cycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use offsync_common::RetryStrategy;
use offsync_domain::{
    DispatchConfig, EntityType, OffsyncError, OperationKind, OperationRecord, RemoteError,
    RemoteResult, Result,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::dependency::{BlockReason, BlockedOn, DependencyResolver, Readiness, ResolvedParent};
use super::ports::{IdMappingRepository, QueueStore, RemoteApplier};

/// A record blocked on a parent that was never enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingParentReport {
    pub operation_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub field: String,
    pub parent_type: EntityType,
    pub parent_id: String,
}

impl MissingParentReport {
    fn new(record: &OperationRecord, block: BlockedOn) -> Self {
        Self {
            operation_id: record.id.clone(),
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id.clone(),
            field: block.field,
            parent_type: block.entity_type,
            parent_id: block.entity_id,
        }
    }
}

/// Counters for one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Records claimed and sent.
    pub attempted: usize,
    /// Acknowledged by the remote side, including adopted conflicts.
    pub completed: usize,
    /// Marked failed after a permanent error or exhausted retries.
    pub failed: usize,
    /// Left pending because a dependency was not ready.
    pub deferred: usize,
    /// Claimed elsewhere, changed underneath, or not reached.
    pub skipped: usize,
    /// Extra in-cycle attempts on transient failures.
    pub retried: u32,
    /// Creates completed by adopting an existing remote entity.
    pub conflicts_resolved: usize,
    /// Parents referenced by deferred records that were never enqueued.
    pub missing_parents: Vec<MissingParentReport>,
    /// Dispatch is halted on an authentication failure.
    pub halted: bool,
    /// The cycle stopped early on cancellation.
    pub cancelled: bool,
}

impl CycleReport {
    /// True when nothing was sent.
    pub fn is_idle(&self) -> bool {
        self.attempted == 0
    }

    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Completed { retries, conflict_resolved } => {
                self.attempted += 1;
                self.completed += 1;
                self.retried += retries;
                if conflict_resolved {
                    self.conflicts_resolved += 1;
                }
            }
            RecordOutcome::Failed { retries } => {
                self.attempted += 1;
                self.failed += 1;
                self.retried += retries;
            }
            RecordOutcome::Deferred(missing) => {
                self.deferred += 1;
                self.missing_parents.extend(missing);
            }
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Halted => {
                self.attempted += 1;
                self.halted = true;
            }
            RecordOutcome::Cancelled => {
                self.skipped += 1;
                self.cancelled = true;
            }
        }
    }
}

#[derive(Debug)]
enum RecordOutcome {
    Completed { retries: u32, conflict_resolved: bool },
    Failed { retries: u32 },
    Deferred(Vec<MissingParentReport>),
    Skipped,
    Halted,
    Cancelled,
}

/// Pulls eligible records and applies them remotely.
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    mappings: Arc<dyn IdMappingRepository>,
    remote: Arc<dyn RemoteApplier>,
    resolver: DependencyResolver,
    config: DispatchConfig,
    retry: RetryStrategy,
    halted: AtomicBool,
}

impl Dispatcher {
    /// Construct a dispatcher over the given ports. Fails when `config`
    /// is invalid.
    pub fn new(
        store: Arc<dyn QueueStore>,
        mappings: Arc<dyn IdMappingRepository>,
        remote: Arc<dyn RemoteApplier>,
        resolver: DependencyResolver,
        config: DispatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryStrategy::custom(
            config.max_in_cycle_attempts,
            std::time::Duration::from_millis(config.retry_base_delay_ms),
            std::time::Duration::from_millis(config.retry_max_delay_ms),
        )
        .map_err(|e| OffsyncError::Config(e.to_string()))?;

        Ok(Self {
            store,
            mappings,
            remote,
            resolver,
            config,
            retry,
            halted: AtomicBool::new(false),
        })
    }

    /// Settings this dispatcher was built with.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Set after the remote side rejected our credentials.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Clears an authentication halt once credentials are refreshed.
    pub fn resume(&self) {
        if self.halted.swap(false, Ordering::SeqCst) {
            info!("dispatch resumed");
        }
    }

    fn halt(&self, reason: &str) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            warn!(reason, "dispatch halted until credentials are refreshed");
        }
    }

    /// Startup recovery: in-flight records older than the stale timeout
    /// become failed so the next sweep re-evaluates them.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<u64> {
        let recovered = self.store.recover_stale_in_flight(self.config.stale_after()).await?;
        if recovered > 0 {
            warn!(recovered, "recovered stale in-flight operations");
        }
        Ok(recovered)
    }

    /// Runs one dispatch cycle.
    ///
    /// Priority classes run in ascending order; records inside a class run
    /// concurrently up to `max_concurrency`. Cancellation is honoured
    /// between records.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        if self.is_halted() {
            report.halted = true;
            return Ok(report);
        }

        let ceiling = if self.config.strict_class_order {
            match self.store.lowest_pending_priority().await? {
                Some(priority) => Some(priority),
                None => return Ok(report),
            }
        } else {
            None
        };

        let batch = self.store.next_batch(ceiling, self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(report);
        }
        debug!(records = batch.len(), ?ceiling, "dispatch batch loaded");

        let mut classes: BTreeMap<i32, Vec<OperationRecord>> = BTreeMap::new();
        for record in batch {
            classes.entry(record.priority).or_default().push(record);
        }

        let abort = AtomicBool::new(false);
        for (priority, records) in classes {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.skipped += records.len();
                continue;
            }
            if self.is_halted() {
                report.halted = true;
                report.skipped += records.len();
                continue;
            }

            debug!(priority, records = records.len(), "dispatching priority class");
            let mut outcomes = stream::iter(records)
                .map(|record| self.process(record, cancel, &abort))
                .buffer_unordered(self.config.max_concurrency.max(1));

            let mut fatal = None;
            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    Ok(outcome) => report.record(outcome),
                    Err(err) => {
                        abort.store(true, Ordering::SeqCst);
                        fatal.get_or_insert(err);
                    }
                }
            }

            if let Some(err) = fatal {
                error!(error = %err, "dispatch cycle aborted by storage failure");
                return Err(err);
            }
        }

        report.halted |= self.is_halted();
        info!(
            attempted = report.attempted,
            completed = report.completed,
            failed = report.failed,
            deferred = report.deferred,
            retried = report.retried,
            halted = report.halted,
            "dispatch cycle finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        record: OperationRecord,
        cancel: &CancellationToken,
        abort: &AtomicBool,
    ) -> Result<RecordOutcome> {
        if cancel.is_cancelled() {
            return Ok(RecordOutcome::Cancelled);
        }
        if abort.load(Ordering::SeqCst) || self.is_halted() {
            return Ok(RecordOutcome::Skipped);
        }

        let parents = match self
            .resolver
            .is_ready(&record, self.store.as_ref(), self.mappings.as_ref())
            .await?
        {
            Readiness::Ready { parents } => parents,
            Readiness::Blocked(blocks) => {
                let missing = blocks
                    .into_iter()
                    .filter(|b| b.reason == BlockReason::MissingParent)
                    .map(|b| MissingParentReport::new(&record, b))
                    .collect();
                return Ok(RecordOutcome::Deferred(missing));
            }
        };

        if !self.store.mark_in_flight(&record.id).await? {
            debug!(operation_id = %record.id, "operation claimed elsewhere");
            return Ok(RecordOutcome::Skipped);
        }

        match self.dispatch_claimed(&record, &parents).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                abort.store(true, Ordering::SeqCst);
                if let Err(release_err) = self.store.release(&record.id).await {
                    warn!(
                        operation_id = %record.id,
                        error = %release_err,
                        "could not release operation; stale recovery will pick it up"
                    );
                }
                Err(err)
            }
        }
    }

    async fn dispatch_claimed(
        &self,
        record: &OperationRecord,
        parents: &[ResolvedParent],
    ) -> Result<RecordOutcome> {
        let payload = self.resolver.translate_payload(record, parents);
        let target = match record.kind {
            OperationKind::Create => None,
            OperationKind::Update | OperationKind::Delete => Some(
                self.resolver
                    .remote_id_for(
                        &record.entity_type,
                        &record.entity_id,
                        self.store.as_ref(),
                        self.mappings.as_ref(),
                    )
                    .await?,
            ),
        };

        let outcome = self
            .retry
            .execute_with_outcome("dispatch", RemoteError::is_retryable, || {
                self.call_remote(record, &payload, target.as_deref())
            })
            .await;
        let retries = outcome.retries();

        match outcome.result {
            Ok(remote_id) => {
                debug!(
                    operation_id = %record.id,
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    kind = %record.kind,
                    "operation applied"
                );
                self.complete(record, remote_id.as_deref(), retries, false).await
            }
            Err(RemoteError::Conflict { existing_remote_id, message }) => {
                self.settle_conflict(record, existing_remote_id, &message, retries).await
            }
            Err(RemoteError::Unauthenticated(reason)) => {
                self.store.release(&record.id).await?;
                self.halt(&reason);
                Ok(RecordOutcome::Halted)
            }
            Err(err) => self.fail(record, &err.to_record_error(), retries).await,
        }
    }

    async fn call_remote(
        &self,
        record: &OperationRecord,
        payload: &Value,
        target: Option<&str>,
    ) -> RemoteResult<Option<String>> {
        match (record.kind, target) {
            (OperationKind::Create, _) => {
                self.remote.create(&record.entity_type, payload).await.map(Some)
            }
            (OperationKind::Update, Some(remote_id)) => {
                self.remote.update(&record.entity_type, remote_id, payload).await.map(|()| None)
            }
            (OperationKind::Delete, Some(remote_id)) => {
                self.remote.delete(&record.entity_type, remote_id).await.map(|()| None)
            }
            (kind, None) => Err(RemoteError::Validation(format!(
                "{kind} for {}/{} has no remote target",
                record.entity_type, record.entity_id
            ))),
        }
    }

    /// Conflict means the entity already exists remotely. Creates adopt the
    /// existing identifier; updates and deletes are already applied.
    async fn settle_conflict(
        &self,
        record: &OperationRecord,
        existing_remote_id: Option<String>,
        message: &str,
        retries: u32,
    ) -> Result<RecordOutcome> {
        if !record.is_create() {
            debug!(operation_id = %record.id, message, "conflict treated as applied");
            return self.complete(record, None, retries, true).await;
        }

        let resolved = match existing_remote_id {
            Some(remote_id) => Some(remote_id),
            None => self.lookup_existing(record).await?,
        };

        match resolved {
            Some(remote_id) => {
                info!(
                    operation_id = %record.id,
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    remote_id = %remote_id,
                    "create conflict resolved to existing remote entity"
                );
                self.complete(record, Some(&remote_id), retries, true).await
            }
            None => {
                let error =
                    RemoteError::conflict(None, format!("{message} (remote id unresolved)"));
                self.fail(record, &error.to_record_error(), retries).await
            }
        }
    }

    async fn lookup_existing(&self, record: &OperationRecord) -> Result<Option<String>> {
        match self.remote.exists(&record.entity_type, &record.entity_id).await {
            Ok(true) => return Ok(Some(record.entity_id.clone())),
            Ok(false) => {}
            Err(err) => {
                debug!(operation_id = %record.id, error = %err, "existence lookup failed");
            }
        }
        self.mappings.remote_id_for(&record.entity_type, &record.entity_id).await
    }

    async fn complete(
        &self,
        record: &OperationRecord,
        remote_id: Option<&str>,
        retries: u32,
        conflict_resolved: bool,
    ) -> Result<RecordOutcome> {
        match self.store.mark_completed(&record.id, remote_id).await {
            Ok(()) => Ok(RecordOutcome::Completed { retries, conflict_resolved }),
            Err(OffsyncError::InvalidTransition(detail)) => {
                warn!(
                    operation_id = %record.id,
                    detail = %detail,
                    "operation changed while in flight"
                );
                Ok(RecordOutcome::Skipped)
            }
            Err(err) => Err(err),
        }
    }

    async fn fail(
        &self,
        record: &OperationRecord,
        error: &str,
        retries: u32,
    ) -> Result<RecordOutcome> {
        warn!(
            operation_id = %record.id,
            entity_type = %record.entity_type,
            entity_id = %record.entity_id,
            error,
            "operation failed"
        );
        match self.store.mark_failed(&record.id, error).await {
            Ok(()) => Ok(RecordOutcome::Failed { retries }),
            Err(OffsyncError::InvalidTransition(detail)) => {
                warn!(
                    operation_id = %record.id,
                    detail = %detail,
                    "operation changed while in flight"
                );
                Ok(RecordOutcome::Skipped)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_outcomes() {
        let mut report = CycleReport::default();
        report.record(RecordOutcome::Completed { retries: 2, conflict_resolved: true });
        report.record(RecordOutcome::Failed { retries: 1 });
        report.record(RecordOutcome::Deferred(Vec::new()));
        report.record(RecordOutcome::Skipped);

        assert_eq!(report.attempted, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.retried, 3);
        assert_eq!(report.conflicts_resolved, 1);
        assert!(!report.halted);
    }

    #[test]
    fn halted_and_cancelled_flags() {
        let mut report = CycleReport::default();
        assert!(report.is_idle());

        report.record(RecordOutcome::Halted);
        report.record(RecordOutcome::Cancelled);

        assert!(report.halted);
        assert!(report.cancelled);
        assert!(!report.is_idle());
    }
}
