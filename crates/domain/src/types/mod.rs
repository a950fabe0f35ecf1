//! Domain types and models

pub mod mapping;
pub mod operation;
pub mod schema;
pub mod stats;

pub use mapping::IdMapping;
pub use operation::{
    is_permanent_error, EntityType, NewOperation, OperationKind, OperationRecord, OperationStatus,
    ResetFilter, PERMANENT_ERROR_PREFIXES,
};
pub use schema::{EntitySpec, SyncSchema};
pub use stats::{FailedEntitySummary, StatusSummary};
