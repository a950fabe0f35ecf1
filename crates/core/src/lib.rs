//! # offsync Core
//!
//! Sync engine logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces for the queue store, identifier mappings, the local
//!   store and the remote applier
//! - The dependency resolver, dispatcher and reconciler
//! - `SyncService`, the mutation intake and operator operations
//!
//! ## Architecture Principles
//! - Only depends on `offsync-common` and `offsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod sync;

pub use sync::dependency::{BlockReason, BlockedOn, DependencyResolver, Readiness, ResolvedParent};
pub use sync::dispatcher::{CycleReport, Dispatcher, MissingParentReport};
pub use sync::ports::{IdMappingRepository, LocalStore, QueueStore, RemoteApplier};
pub use sync::reconciler::{Escalation, EscalationKind, ReconcileReport, Reconciler};
pub use sync::service::{MutationOutcome, ResyncReport, SyncService};
