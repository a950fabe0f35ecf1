//! Queue reporting types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::operation::OperationStatus;

/// Record counts by status and by entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_entity: BTreeMap<String, BTreeMap<String, u64>>,
}

impl StatusSummary {
    /// Adds `count` records of one entity type in one status.
    pub fn add(&mut self, entity_type: &str, status: OperationStatus, count: u64) {
        self.total += count;
        *self.by_status.entry(status.to_string()).or_default() += count;
        *self
            .by_entity
            .entry(entity_type.to_owned())
            .or_default()
            .entry(status.to_string())
            .or_default() += count;
    }

    pub fn count(&self, status: OperationStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn count_for(&self, entity_type: &str, status: OperationStatus) -> u64 {
        self.by_entity
            .get(entity_type)
            .and_then(|m| m.get(status.as_str()))
            .copied()
            .unwrap_or(0)
    }
}

/// Failed records grouped by entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntitySummary {
    pub entity_type: String,
    pub count: u64,
    pub max_retry_count: u32,
    /// Most recent error among the group.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_accumulates_per_status_and_entity() {
        let mut summary = StatusSummary::default();
        summary.add("sale", OperationStatus::Pending, 3);
        summary.add("sale", OperationStatus::Failed, 1);
        summary.add("customer", OperationStatus::Pending, 2);

        assert_eq!(summary.total, 6);
        assert_eq!(summary.count(OperationStatus::Pending), 5);
        assert_eq!(summary.count(OperationStatus::Completed), 0);
        assert_eq!(summary.count_for("sale", OperationStatus::Failed), 1);
        assert_eq!(summary.count_for("payment", OperationStatus::Failed), 0);
    }
}
