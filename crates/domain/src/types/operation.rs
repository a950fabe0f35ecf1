//! Operation records: the durable unit of sync state

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{OffsyncError, Result};

/// Domain kind an operation targets (`customer`, `sale_item`, ...).
///
/// Lowercase snake_case. The set is open: new kinds are added through the
/// schema, never through code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    /// Validates and normalizes an entity type name.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim().to_lowercase();
        if name.is_empty() {
            return Err(OffsyncError::InvalidInput("entity type must not be empty".into()));
        }
        if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(OffsyncError::InvalidInput(format!(
                "entity type '{name}' must be snake_case ascii"
            )));
        }
        Ok(Self(name))
    }

    /// Builds a known-good name without validation.
    pub(crate) fn known(name: &'static str) -> Self {
        Self(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityType {
    type Error = OffsyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.0
    }
}

impl std::str::FromStr for EntityType {
    type Err = OffsyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Which remote call shape replays the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

crate::impl_domain_status_conversions!(OperationKind {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

/// Operation status.
///
/// `pending -> in_flight -> {completed | failed}`, and `failed -> pending`
/// only through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

crate::impl_domain_status_conversions!(OperationStatus {
    Pending => "pending",
    InFlight => "in_flight",
    Completed => "completed",
    Failed => "failed",
});

impl OperationStatus {
    /// Pending and in-flight records hold the per-key uniqueness slot.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Completed)
                | (Self::InFlight, Self::Failed)
                | (Self::InFlight, Self::Pending)
                | (Self::Failed, Self::Pending)
        )
    }
}

/// Enqueue request for a local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: OperationKind,
    pub payload: Value,
    pub priority: i32,
}

impl NewOperation {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        kind: OperationKind,
        payload: Value,
        priority: i32,
    ) -> Self {
        Self { entity_type, entity_id: entity_id.into(), kind, payload, priority }
    }

    /// Structural checks every store applies before inserting.
    pub fn validate(&self) -> Result<()> {
        if self.entity_id.trim().is_empty() {
            return Err(OffsyncError::InvalidInput(format!(
                "{} operation for {} has an empty entity id",
                self.kind, self.entity_type
            )));
        }
        if !self.payload.is_object() {
            return Err(OffsyncError::InvalidInput(format!(
                "payload for {}/{} must be a JSON object",
                self.entity_type, self.entity_id
            )));
        }
        if self.priority < 0 {
            return Err(OffsyncError::InvalidInput(format!(
                "priority must be non-negative, got {}",
                self.priority
            )));
        }
        Ok(())
    }
}

/// One pending or historical attempt to propagate a local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String, // UUIDv7
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: OperationKind,
    pub payload: Value,
    pub priority: i32,
    pub status: OperationStatus,
    /// Failures since the last reset.
    pub retry_count: u32,
    /// Failures over the record's whole life; never reset.
    pub lifetime_failures: u32,
    pub last_error: Option<String>,
    /// Remote identifier returned by a successful create.
    pub remote_id: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub processed_at: Option<i64>,
    /// Insertion order, breaks `created_at` ties.
    pub seq: i64,
}

impl OperationRecord {
    /// Builds a fresh pending record from an enqueue request.
    pub fn from_new(op: NewOperation, created_at: i64, seq: i64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            entity_type: op.entity_type,
            entity_id: op.entity_id,
            kind: op.kind,
            payload: op.payload,
            priority: op.priority,
            status: OperationStatus::Pending,
            retry_count: 0,
            lifetime_failures: 0,
            last_error: None,
            remote_id: None,
            created_at,
            started_at: None,
            processed_at: None,
            seq,
        }
    }

    pub fn is_create(&self) -> bool {
        self.kind == OperationKind::Create
    }

    /// Whether the payload carries this record's entity id under `id_field`.
    ///
    /// Numeric ids are compared by their decimal form.
    pub fn has_embedded_id(&self, id_field: &str) -> bool {
        match self.payload.get(id_field) {
            Some(Value::String(s)) => s == &self.entity_id,
            Some(Value::Number(n)) => n.to_string() == self.entity_id,
            _ => false,
        }
    }

    /// Failed with an error class retrying cannot fix (validation, or a
    /// conflict whose remote id could not be resolved).
    pub fn failed_permanently(&self) -> bool {
        self.status == OperationStatus::Failed
            && self.last_error.as_deref().is_some_and(is_permanent_error)
    }

    /// Reads a parent reference from the payload, if present and non-null.
    pub fn reference(&self, field: &str) -> Option<String> {
        match self.payload.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// `last_error` prefixes written for failures retrying cannot fix.
pub const PERMANENT_ERROR_PREFIXES: [&str; 2] = ["validation:", "conflict:"];

/// Whether a stored error string marks a failure retrying cannot fix.
pub fn is_permanent_error(error: &str) -> bool {
    PERMANENT_ERROR_PREFIXES.iter().any(|prefix| error.starts_with(prefix))
}

/// Selects failed records for a bulk reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetFilter {
    pub entity_type: Option<EntityType>,
    /// Only records with `retry_count` strictly below this value.
    pub max_retry_count: Option<u32>,
    /// Only records with `lifetime_failures` strictly below this value.
    pub max_lifetime_failures: Option<u32>,
    /// Leave validation and unresolved-conflict failures alone.
    #[serde(default)]
    pub skip_permanent: bool,
}

impl ResetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_entity(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    #[must_use]
    pub fn below_retry_count(mut self, ceiling: u32) -> Self {
        self.max_retry_count = Some(ceiling);
        self
    }

    #[must_use]
    pub fn below_lifetime_failures(mut self, ceiling: u32) -> Self {
        self.max_lifetime_failures = Some(ceiling);
        self
    }

    #[must_use]
    pub fn retryable_only(mut self) -> Self {
        self.skip_permanent = true;
        self
    }

    /// Applies the filter to an in-memory record.
    pub fn matches(&self, record: &OperationRecord) -> bool {
        record.status == OperationStatus::Failed
            && self.entity_type.as_ref().map_or(true, |t| t == &record.entity_type)
            && self.max_retry_count.map_or(true, |max| record.retry_count < max)
            && self.max_lifetime_failures.map_or(true, |max| record.lifetime_failures < max)
            && !(self.skip_permanent && record.failed_permanently())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    fn sale() -> EntityType {
        EntityType::new("sale").unwrap()
    }

    #[test]
    fn entity_type_is_normalized_and_validated() {
        assert_eq!(EntityType::new(" Sale_Item ").unwrap().as_str(), "sale_item");
        assert!(EntityType::new("").is_err());
        assert!(EntityType::new("sale-item").is_err());
        assert!(serde_json::from_value::<EntityType>(json!("bad type")).is_err());
    }

    #[test]
    fn status_storage_form_round_trips() {
        assert_eq!(OperationStatus::InFlight.to_string(), "in_flight");
        assert_eq!(OperationStatus::from_str("IN_FLIGHT").unwrap(), OperationStatus::InFlight);
        assert_eq!(serde_json::to_value(OperationStatus::InFlight).unwrap(), json!("in_flight"));
        assert_eq!(OperationKind::from_str("Delete").unwrap(), OperationKind::Delete);
    }

    #[test]
    fn state_machine_only_allows_documented_edges() {
        use OperationStatus::{Completed, Failed, InFlight, Pending};
        assert!(Pending.can_transition_to(InFlight));
        assert!(InFlight.can_transition_to(Completed));
        assert!(InFlight.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(InFlight));
    }

    #[test]
    fn new_operation_rejects_malformed_requests() {
        let ok = NewOperation::new(sale(), "s-1", OperationKind::Create, json!({"id": "s-1"}), 1);
        assert!(ok.validate().is_ok());

        let mut empty_id = ok.clone();
        empty_id.entity_id = "  ".into();
        assert!(empty_id.validate().is_err());

        let mut scalar = ok.clone();
        scalar.payload = json!("s-1");
        assert!(scalar.validate().is_err());

        let mut negative = ok;
        negative.priority = -1;
        assert!(negative.validate().is_err());
    }

    #[test]
    fn embedded_id_detection() {
        let op = NewOperation::new(sale(), "42", OperationKind::Create, json!({"id": 42}), 1);
        let record = OperationRecord::from_new(op, 0, 1);
        assert!(record.has_embedded_id("id"));
        assert!(!record.has_embedded_id("saleId"));

        let op = NewOperation::new(sale(), "s-1", OperationKind::Create, json!({"total": 5}), 1);
        assert!(!OperationRecord::from_new(op, 0, 1).has_embedded_id("id"));
    }

    #[test]
    fn references_skip_null_and_empty_values() {
        let op = NewOperation::new(
            EntityType::new("sale_item").unwrap(),
            "i-1",
            OperationKind::Create,
            json!({"saleId": "s-1", "productId": null, "note": "", "qty": 3}),
            2,
        );
        let record = OperationRecord::from_new(op, 0, 1);
        assert_eq!(record.reference("saleId").as_deref(), Some("s-1"));
        assert_eq!(record.reference("productId"), None);
        assert_eq!(record.reference("note"), None);
        assert_eq!(record.reference("qty").as_deref(), Some("3"));
        assert_eq!(record.reference("missing"), None);
    }

    #[test]
    fn reset_filter_matching() {
        let op = NewOperation::new(sale(), "s-1", OperationKind::Create, json!({}), 1);
        let mut record = OperationRecord::from_new(op, 0, 1);
        record.status = OperationStatus::Failed;
        record.retry_count = 2;
        record.lifetime_failures = 4;

        assert!(ResetFilter::all().matches(&record));
        assert!(ResetFilter::all().for_entity(sale()).matches(&record));
        let payments = ResetFilter::all().for_entity(EntityType::new("payment").unwrap());
        assert!(!payments.matches(&record));
        assert!(ResetFilter::all().below_retry_count(3).matches(&record));
        assert!(!ResetFilter::all().below_retry_count(2).matches(&record));
        assert!(!ResetFilter::all().below_lifetime_failures(4).matches(&record));

        record.last_error = Some("validation: name required".into());
        assert!(record.failed_permanently());
        assert!(ResetFilter::all().matches(&record));
        assert!(!ResetFilter::all().retryable_only().matches(&record));

        record.last_error = Some("transient: 503".into());
        assert!(ResetFilter::all().retryable_only().matches(&record));

        record.status = OperationStatus::Pending;
        assert!(!ResetFilter::all().matches(&record));
    }
}
