//! In-memory queue store and id mapping table
//!
//! Mirrors the SQLite adapter's contract: per-key uniqueness of active
//! records, compare-and-set transitions, newest-wins mappings.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use offsync_common::testing::{Clock, MockClock};
use offsync_core::{IdMappingRepository, QueueStore};
use offsync_domain::constants::STALE_IN_FLIGHT_ERROR;
use offsync_domain::{
    EntityType, FailedEntitySummary, IdMapping, NewOperation, OffsyncError, OperationKind,
    OperationRecord, OperationStatus, ResetFilter, Result, StatusSummary,
};
use serde_json::Value;

#[derive(Default)]
struct State {
    records: Vec<OperationRecord>,
    mappings: BTreeMap<(String, String), IdMapping>,
    seq: i64,
    fail_next_completion: bool,
}

impl State {
    fn by_id(&mut self, id: &str) -> Option<&mut OperationRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    fn has_active(&self, entity_type: &EntityType, entity_id: &str, kind: OperationKind) -> bool {
        self.records.iter().any(|r| {
            r.status.is_active()
                && &r.entity_type == entity_type
                && r.entity_id == entity_id
                && r.kind == kind
        })
    }
}

#[derive(Clone)]
pub struct InMemorySyncStore {
    state: Arc<Mutex<State>>,
    clock: MockClock,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self { state: Arc::default(), clock: MockClock::new() }
    }

    pub fn clock(&self) -> MockClock {
        self.clock.clone()
    }

    /// Inserts a record as-is, bypassing enqueue checks. Used to set up
    /// states older releases could leave behind.
    pub fn seed(&self, mut record: OperationRecord) -> OperationRecord {
        let mut state = self.state.lock().unwrap();
        state.seq += 1;
        record.seq = state.seq;
        state.records.push(record.clone());
        record
    }

    /// The next `mark_completed` fails as if the database were locked,
    /// leaving the record untouched.
    pub fn fail_next_completion(&self) {
        self.state.lock().unwrap().fail_next_completion = true;
    }

    pub fn records(&self) -> Vec<OperationRecord> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn record(&self, id: &str) -> OperationRecord {
        self.records().into_iter().find(|r| r.id == id).expect("record exists")
    }

    pub fn with_status(&self, status: OperationStatus) -> Vec<OperationRecord> {
        self.records().into_iter().filter(|r| r.status == status).collect()
    }

    pub fn mapping(&self, entity_type: &str, entity_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .mappings
            .get(&(entity_type.to_owned(), entity_id.to_owned()))
            .map(|m| m.remote_id.clone())
    }

    fn transition(
        &self,
        id: &str,
        to: OperationStatus,
        apply: impl FnOnce(&mut OperationRecord, i64),
    ) -> Result<OperationRecord> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap();
        let record = state
            .by_id(id)
            .ok_or_else(|| OffsyncError::NotFound(format!("operation {id}")))?;
        if record.status != OperationStatus::InFlight || !record.status.can_transition_to(to) {
            return Err(OffsyncError::InvalidTransition(format!(
                "operation {id} is {}, cannot move to {to}",
                record.status
            )));
        }
        record.status = to;
        apply(record, now);
        Ok(record.clone())
    }
}

#[async_trait]
impl QueueStore for InMemorySyncStore {
    async fn enqueue(&self, op: NewOperation) -> Result<OperationRecord> {
        op.validate()?;
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap();
        if state.has_active(&op.entity_type, &op.entity_id, op.kind) {
            return Err(OffsyncError::DuplicateOperation {
                entity_type: op.entity_type,
                entity_id: op.entity_id,
                kind: op.kind,
            });
        }
        state.seq += 1;
        let record = OperationRecord::from_new(op, now, state.seq);
        state.records.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<OperationRecord>> {
        Ok(self.state.lock().unwrap().records.iter().find(|r| r.id == id).cloned())
    }

    async fn next_batch(
        &self,
        max_priority: Option<i32>,
        limit: usize,
    ) -> Result<Vec<OperationRecord>> {
        let mut batch: Vec<OperationRecord> = self
            .records()
            .into_iter()
            .filter(|r| r.status == OperationStatus::Pending)
            .filter(|r| max_priority.map_or(true, |max| r.priority <= max))
            .collect();
        batch.sort_by_key(|r| (r.priority, r.created_at, r.seq));
        batch.truncate(limit);
        Ok(batch)
    }

    async fn lowest_pending_priority(&self) -> Result<Option<i32>> {
        Ok(self
            .records()
            .iter()
            .filter(|r| r.status == OperationStatus::Pending)
            .map(|r| r.priority)
            .min())
    }

    async fn mark_in_flight(&self, id: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap();
        match state.by_id(id) {
            Some(record) if record.status == OperationStatus::Pending => {
                record.status = OperationStatus::InFlight;
                record.started_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(&self, id: &str, remote_id: Option<&str>) -> Result<()> {
        if std::mem::take(&mut self.state.lock().unwrap().fail_next_completion) {
            return Err(OffsyncError::Database("database is locked".into()));
        }
        let record = self.transition(id, OperationStatus::Completed, |r, now| {
            r.processed_at = Some(now);
            r.last_error = None;
            if let Some(remote_id) = remote_id {
                r.remote_id = Some(remote_id.to_owned());
            }
        })?;
        if let (true, Some(remote_id)) = (record.is_create(), remote_id) {
            let mapping = IdMapping::new(
                record.entity_type.clone(),
                record.entity_id.as_str(),
                remote_id,
                self.clock.now_millis(),
            );
            self.upsert(&mapping).await?;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.transition(id, OperationStatus::Failed, |r, _| {
            r.retry_count += 1;
            r.lifetime_failures += 1;
            r.last_error = Some(error.to_owned());
        })
        .map(|_| ())
    }

    async fn release(&self, id: &str) -> Result<()> {
        self.transition(id, OperationStatus::Pending, |r, _| r.started_at = None).map(|_| ())
    }

    async fn reset_failed(&self, filter: &ResetFilter) -> Result<u64> {
        let mut state = self.state.lock().unwrap();

        let mut newest: HashMap<(EntityType, String, OperationKind), OperationRecord> =
            HashMap::new();
        for r in state.records.iter().filter(|r| r.status == OperationStatus::Failed) {
            let key = (r.entity_type.clone(), r.entity_id.clone(), r.kind);
            if newest.get(&key).map_or(true, |seen| r.seq > seen.seq) {
                newest.insert(key, r.clone());
            }
        }

        let mut reset = 0;
        for ((entity_type, entity_id, kind), record) in newest {
            if !filter.matches(&record) || state.has_active(&entity_type, &entity_id, kind) {
                continue;
            }
            if let Some(stored) = state.by_id(&record.id) {
                stored.status = OperationStatus::Pending;
                stored.retry_count = 0;
                stored.last_error = None;
                stored.started_at = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn refresh_pending_payload(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        kind: OperationKind,
        payload: &Value,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let pending = state.records.iter_mut().find(|r| {
            r.status == OperationStatus::Pending
                && &r.entity_type == entity_type
                && r.entity_id == entity_id
                && r.kind == kind
        });
        Ok(pending.map(|r| r.payload = payload.clone()).is_some())
    }

    async fn find_by_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Vec<OperationRecord>> {
        let mut found: Vec<OperationRecord> = self
            .records()
            .into_iter()
            .filter(|r| &r.entity_type == entity_type && r.entity_id == entity_id)
            .collect();
        found.sort_by_key(|r| std::cmp::Reverse(r.seq));
        Ok(found)
    }

    async fn list_by_status(
        &self,
        status: OperationStatus,
        entity_type: Option<&EntityType>,
        limit: usize,
    ) -> Result<Vec<OperationRecord>> {
        let mut found: Vec<OperationRecord> = self
            .records()
            .into_iter()
            .filter(|r| r.status == status && entity_type.map_or(true, |t| &r.entity_type == t))
            .collect();
        found.sort_by_key(|r| r.seq);
        found.truncate(limit);
        Ok(found)
    }

    async fn completed_creates(
        &self,
        entity_type: Option<&EntityType>,
    ) -> Result<Vec<OperationRecord>> {
        let mut found: Vec<OperationRecord> = self
            .records()
            .into_iter()
            .filter(|r| r.status == OperationStatus::Completed && r.is_create())
            .filter(|r| entity_type.map_or(true, |t| &r.entity_type == t))
            .collect();
        found.sort_by_key(|r| std::cmp::Reverse(r.seq));
        Ok(found)
    }

    async fn reprioritize(&self, entity_type: &EntityType, priority: i32) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for r in state.records.iter_mut().filter(|r| {
            r.status == OperationStatus::Pending
                && &r.entity_type == entity_type
                && r.priority != priority
        }) {
            r.priority = priority;
            changed += 1;
        }
        Ok(changed)
    }

    async fn recover_stale_in_flight(&self, older_than: Duration) -> Result<u64> {
        let cutoff = self.clock.now_millis() - i64::try_from(older_than.as_millis()).unwrap();
        let mut state = self.state.lock().unwrap();
        let mut recovered = 0;
        for r in state.records.iter_mut().filter(|r| {
            r.status == OperationStatus::InFlight && r.started_at.map_or(true, |s| s <= cutoff)
        }) {
            r.status = OperationStatus::Failed;
            r.retry_count += 1;
            r.lifetime_failures += 1;
            r.last_error = Some(STALE_IN_FLIGHT_ERROR.to_owned());
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn purge_completed(&self, older_than: Duration) -> Result<u64> {
        let cutoff = self.clock.now_millis() - i64::try_from(older_than.as_millis()).unwrap();
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        let State { records, mappings, .. } = &mut *state;
        records.retain(|r| {
            let purgeable = r.status == OperationStatus::Completed
                && r.processed_at.is_some_and(|p| p <= cutoff)
                && (!r.is_create()
                    || mappings.contains_key(&(r.entity_type.to_string(), r.entity_id.clone())));
            !purgeable
        });
        Ok((before - records.len()) as u64)
    }

    async fn status_summary(&self) -> Result<StatusSummary> {
        let mut summary = StatusSummary::default();
        for r in self.records() {
            summary.add(r.entity_type.as_str(), r.status, 1);
        }
        Ok(summary)
    }

    async fn failed_summary(&self) -> Result<Vec<FailedEntitySummary>> {
        let mut groups: BTreeMap<String, FailedEntitySummary> = BTreeMap::new();
        for r in self.with_status(OperationStatus::Failed) {
            let entry = groups.entry(r.entity_type.to_string()).or_insert(FailedEntitySummary {
                entity_type: r.entity_type.to_string(),
                count: 0,
                max_retry_count: 0,
                last_error: None,
            });
            entry.count += 1;
            entry.max_retry_count = entry.max_retry_count.max(r.retry_count);
            entry.last_error = r.last_error.clone();
        }
        Ok(groups.into_values().collect())
    }
}

#[async_trait]
impl IdMappingRepository for InMemorySyncStore {
    async fn get(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<IdMapping>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mappings
            .get(&(entity_type.to_string(), entity_id.to_owned()))
            .cloned())
    }

    async fn upsert(&self, mapping: &IdMapping) -> Result<()> {
        self.state.lock().unwrap().mappings.insert(
            (mapping.entity_type.to_string(), mapping.entity_id.clone()),
            mapping.clone(),
        );
        Ok(())
    }

    async fn find_by_remote(
        &self,
        entity_type: &EntityType,
        remote_id: &str,
    ) -> Result<Option<IdMapping>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mappings
            .values()
            .find(|m| &m.entity_type == entity_type && m.remote_id == remote_id)
            .cloned())
    }

    async fn list(&self, entity_type: Option<&EntityType>) -> Result<Vec<IdMapping>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mappings
            .values()
            .filter(|m| entity_type.map_or(true, |t| &m.entity_type == t))
            .cloned()
            .collect())
    }
}
