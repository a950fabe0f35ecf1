//! Declarative entity schema
//!
//! The local store describes each entity type once: its priority class, the
//! payload field holding its id, and which payload fields reference parent
//! entities. The engine never hard-codes any of this.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::operation::EntityType;
use crate::constants::DEFAULT_ID_FIELD;
use crate::errors::{OffsyncError, Result};

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_owned()
}

/// Schema entry for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub entity_type: EntityType,
    /// Priority class; lower dispatches earlier.
    pub priority: i32,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Local table holding the entity, used for snapshots and resyncs.
    #[serde(default)]
    pub table: Option<String>,
    /// Payload field -> referenced parent entity type.
    #[serde(default)]
    pub parents: BTreeMap<String, EntityType>,
}

impl EntitySpec {
    pub fn new(entity_type: EntityType, priority: i32) -> Self {
        Self {
            entity_type,
            priority,
            id_field: default_id_field(),
            table: None,
            parents: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, field: impl Into<String>, parent: EntityType) -> Self {
        self.parents.insert(field.into(), parent);
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Local table name, defaulting to the plural of the entity type.
    pub fn table_name(&self) -> String {
        self.table.clone().unwrap_or_else(|| format!("{}s", self.entity_type))
    }
}

/// The full set of synchronized entity types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSchema {
    pub entities: Vec<EntitySpec>,
}

impl SyncSchema {
    pub fn new(entities: Vec<EntitySpec>) -> Self {
        Self { entities }
    }

    /// Adds a spec, replacing any existing entry for the same type.
    #[must_use]
    pub fn with_entity(mut self, spec: EntitySpec) -> Self {
        self.entities.retain(|e| e.entity_type != spec.entity_type);
        self.entities.push(spec);
        self
    }

    pub fn get(&self, entity_type: &EntityType) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| &e.entity_type == entity_type)
    }

    pub fn priority_of(&self, entity_type: &EntityType) -> Option<i32> {
        self.get(entity_type).map(|e| e.priority)
    }

    /// Id field for the type; unknown types use the default.
    pub fn id_field(&self, entity_type: &EntityType) -> &str {
        self.get(entity_type).map_or(DEFAULT_ID_FIELD, |e| e.id_field.as_str())
    }

    /// Parent references declared for the type.
    pub fn parents_of(&self, entity_type: &EntityType) -> Vec<(&str, &EntityType)> {
        self.get(entity_type)
            .map(|e| e.parents.iter().map(|(f, t)| (f.as_str(), t)).collect())
            .unwrap_or_default()
    }

    /// Entity specs sorted parents-first (priority, then name).
    pub fn dependency_order(&self) -> Vec<&EntitySpec> {
        let mut ordered: Vec<&EntitySpec> = self.entities.iter().collect();
        ordered.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| a.entity_type.cmp(&b.entity_type))
        });
        ordered
    }

    /// Checks the priority invariant: every child sits in a strictly higher
    /// class than each of its parents.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for spec in &self.entities {
            if !seen.insert(&spec.entity_type) {
                return Err(OffsyncError::Config(format!(
                    "entity type '{}' is declared twice",
                    spec.entity_type
                )));
            }
            if spec.priority < 0 {
                return Err(OffsyncError::Config(format!(
                    "entity type '{}' has negative priority {}",
                    spec.entity_type, spec.priority
                )));
            }
            if spec.id_field.trim().is_empty() {
                return Err(OffsyncError::Config(format!(
                    "entity type '{}' has an empty id field",
                    spec.entity_type
                )));
            }
        }

        for spec in &self.entities {
            for (field, parent) in &spec.parents {
                let Some(parent_spec) = self.get(parent) else {
                    return Err(OffsyncError::Config(format!(
                        "{}.{field} references undeclared entity type '{parent}'",
                        spec.entity_type
                    )));
                };
                if spec.priority <= parent_spec.priority {
                    return Err(OffsyncError::Config(format!(
                        "{} (priority {}) must sort after its parent {} (priority {}) via {field}",
                        spec.entity_type, spec.priority, parent, parent_spec.priority
                    )));
                }
            }
        }
        Ok(())
    }

    /// Point-of-sale entity set the engine ships with.
    pub fn point_of_sale() -> Self {
        let t = EntityType::known;
        Self::new(vec![
            EntitySpec::new(t("category"), 0).with_table("categories"),
            EntitySpec::new(t("supplier"), 0),
            EntitySpec::new(t("customer"), 0),
            EntitySpec::new(t("product"), 1)
                .with_parent("categoryId", t("category"))
                .with_parent("supplierId", t("supplier")),
            EntitySpec::new(t("sale"), 1).with_parent("customerId", t("customer")),
            EntitySpec::new(t("purchase"), 1).with_parent("supplierId", t("supplier")),
            EntitySpec::new(t("sale_item"), 2)
                .with_parent("saleId", t("sale"))
                .with_parent("productId", t("product")),
            EntitySpec::new(t("purchase_item"), 2)
                .with_parent("purchaseId", t("purchase"))
                .with_parent("productId", t("product")),
            EntitySpec::new(t("debt"), 2).with_parent("customerId", t("customer")),
            EntitySpec::new(t("payment"), 3).with_parent("saleId", t("sale")),
            EntitySpec::new(t("debt_payment"), 3).with_parent("debtId", t("debt")),
        ])
    }
}

impl Default for SyncSchema {
    fn default() -> Self {
        Self::point_of_sale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> EntityType {
        EntityType::new(name).unwrap()
    }

    #[test]
    fn default_schema_is_valid() {
        SyncSchema::default().validate().unwrap();
    }

    #[test]
    fn dependency_order_puts_parents_first() {
        let schema = SyncSchema::default();
        let order: Vec<&str> =
            schema.dependency_order().iter().map(|e| e.entity_type.as_str()).collect();
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(pos("purchase") < pos("purchase_item"));
        assert!(pos("sale") < pos("payment"));
        assert!(pos("customer") < pos("debt"));
        assert!(pos("debt") < pos("debt_payment"));
    }

    #[test]
    fn child_must_outrank_parent() {
        let schema = SyncSchema::new(vec![
            EntitySpec::new(t("purchase"), 1),
            EntitySpec::new(t("purchase_item"), 1).with_parent("purchaseId", t("purchase")),
        ]);
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("must sort after its parent purchase"));
    }

    #[test]
    fn undeclared_parent_is_rejected() {
        let schema = SyncSchema::new(vec![
            EntitySpec::new(t("payment"), 3).with_parent("saleId", t("sale")),
        ]);
        assert!(schema.validate().unwrap_err().to_string().contains("undeclared"));
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let schema = SyncSchema::new(vec![
            EntitySpec::new(t("sale"), 1),
            EntitySpec::new(t("sale"), 2),
        ]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn with_entity_replaces_existing_spec() {
        let schema = SyncSchema::default().with_entity(EntitySpec::new(t("customer"), 4));
        assert_eq!(schema.priority_of(&t("customer")), Some(4));
        assert_eq!(schema.entities.iter().filter(|e| e.entity_type == t("customer")).count(), 1);
    }

    #[test]
    fn lookups_fall_back_for_unknown_types() {
        let schema = SyncSchema::default();
        assert_eq!(schema.id_field(&t("widget")), "id");
        assert!(schema.parents_of(&t("widget")).is_empty());
        assert_eq!(schema.priority_of(&t("widget")), None);
        assert_eq!(schema.get(&t("category")).unwrap().table_name(), "categories");
        assert_eq!(schema.get(&t("sale_item")).unwrap().table_name(), "sale_items");
    }

    #[test]
    fn schema_deserializes_from_toml_with_defaults() {
        let raw = r#"
            [[entities]]
            entity_type = "invoice"
            priority = 0

            [[entities]]
            entity_type = "invoice_line"
            priority = 1
            id_field = "lineId"
            parents = { invoiceId = "invoice" }
        "#;
        let schema: SyncSchema = toml::from_str(raw).unwrap();
        schema.validate().unwrap();
        assert_eq!(schema.id_field(&t("invoice")), "id");
        assert_eq!(schema.id_field(&t("invoice_line")), "lineId");
        assert_eq!(schema.parents_of(&t("invoice_line")), vec![("invoiceId", &t("invoice"))]);
    }
}
