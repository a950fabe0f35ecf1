//! Local-to-remote identifier mappings

use serde::{Deserialize, Serialize};

use super::operation::EntityType;

/// `(entity_type, entity_id) -> remote_id`, written when a create lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub remote_id: String,
    pub updated_at: i64,
}

impl IdMapping {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        remote_id: impl Into<String>,
        updated_at: i64,
    ) -> Self {
        Self { entity_type, entity_id: entity_id.into(), remote_id: remote_id.into(), updated_at }
    }

    /// True when the remote system adopted the local identifier.
    pub fn is_identity(&self) -> bool {
        self.entity_id == self.remote_id
    }
}
