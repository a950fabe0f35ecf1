//! In-memory `LocalStore`

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use offsync_core::LocalStore;
use offsync_domain::{EntityType, Result};
use serde_json::Value;

#[derive(Clone, Default)]
pub struct InMemoryLocalStore {
    entities: Arc<Mutex<BTreeMap<(String, String), Value>>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity_type: &str, entity_id: &str, snapshot: Value) {
        self.entities
            .lock()
            .unwrap()
            .insert((entity_type.to_owned(), entity_id.to_owned()), snapshot);
    }

    pub fn remove(&self, entity_type: &str, entity_id: &str) {
        self.entities.lock().unwrap().remove(&(entity_type.to_owned(), entity_id.to_owned()));
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn snapshot(&self, entity_type: &EntityType, entity_id: &str) -> Result<Option<Value>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .get(&(entity_type.to_string(), entity_id.to_owned()))
            .cloned())
    }

    async fn entity_ids(&self, entity_type: &EntityType) -> Result<Vec<String>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| t == entity_type.as_str())
            .map(|(_, id)| id.clone())
            .collect())
    }
}
