//! Scripted `RemoteApplier`

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use offsync_core::RemoteApplier;
use offsync_domain::{EntityType, RemoteError, RemoteResult};
use serde_json::Value;

/// One call the dispatcher made.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub method: &'static str,
    pub entity_type: String,
    pub remote_id: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Default)]
struct RemoteState {
    /// Errors returned, in order, by the next calls for an entity type.
    scripted: HashMap<String, VecDeque<RemoteError>>,
    calls: Vec<RemoteCall>,
    /// Calls in the order they returned.
    finished: Vec<RemoteCall>,
    delays: HashMap<(&'static str, String), Duration>,
    existing: HashSet<(String, String)>,
    next_id: u64,
}

/// Remote side that succeeds unless told otherwise.
///
/// Creates return `srv-{n}` identifiers.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors for the next calls touching `entity_type`.
    pub fn script(&self, entity_type: &str, errors: impl IntoIterator<Item = RemoteError>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(entity_type.to_owned())
            .or_default()
            .extend(errors);
    }

    /// Marks a remote entity as already present.
    pub fn with_existing(&self, entity_type: &str, remote_id: &str) {
        self.state.lock().unwrap().existing.insert((entity_type.to_owned(), remote_id.to_owned()));
    }

    /// Every `method` call for `entity_type` sleeps for `delay` before
    /// answering.
    pub fn slow(&self, method: &'static str, entity_type: &str, delay: Duration) {
        self.state.lock().unwrap().delays.insert((method, entity_type.to_owned()), delay);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, method: &str, entity_type: &str) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.entity_type == entity_type)
            .collect()
    }

    pub fn finished(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().finished.clone()
    }

    /// Sleeps when the call was made slow, then logs it as finished.
    async fn answer(&self, method: &'static str, entity_type: &EntityType, call: RemoteCall) {
        let delay =
            self.state.lock().unwrap().delays.get(&(method, entity_type.to_string())).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().unwrap().finished.push(call);
    }

    fn record(
        &self,
        method: &'static str,
        entity_type: &EntityType,
        remote_id: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<RemoteCall, RemoteError> {
        let call = RemoteCall {
            method,
            entity_type: entity_type.to_string(),
            remote_id: remote_id.map(str::to_owned),
            payload: payload.cloned(),
        };
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        match state.scripted.get_mut(entity_type.as_str()).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(call),
        }
    }
}

#[async_trait]
impl RemoteApplier for MockRemote {
    async fn create(&self, entity_type: &EntityType, payload: &Value) -> RemoteResult<String> {
        let call = self.record("create", entity_type, None, Some(payload))?;
        self.answer("create", entity_type, call).await;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let remote_id = format!("srv-{}", state.next_id);
        state.existing.insert((entity_type.to_string(), remote_id.clone()));
        Ok(remote_id)
    }

    async fn update(
        &self,
        entity_type: &EntityType,
        remote_id: &str,
        payload: &Value,
    ) -> RemoteResult<()> {
        let call = self.record("update", entity_type, Some(remote_id), Some(payload))?;
        self.answer("update", entity_type, call).await;
        Ok(())
    }

    async fn delete(&self, entity_type: &EntityType, remote_id: &str) -> RemoteResult<()> {
        let call = self.record("delete", entity_type, Some(remote_id), None)?;
        self.answer("delete", entity_type, call).await;
        let key = (entity_type.to_string(), remote_id.to_owned());
        self.state.lock().unwrap().existing.remove(&key);
        Ok(())
    }

    async fn exists(&self, entity_type: &EntityType, remote_id: &str) -> RemoteResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.existing.contains(&(entity_type.to_string(), remote_id.to_owned())))
    }
}
