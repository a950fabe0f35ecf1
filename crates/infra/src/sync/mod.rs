//! Remote side of the sync engine and its background workers

pub mod dispatch_worker;
pub mod errors;
pub mod reconcile_worker;
pub mod remote_applier;

pub use dispatch_worker::{DispatchWorker, DispatchWorkerConfig, MissingParentInbox};
pub use errors::{SyncError, SyncErrorCategory};
pub use reconcile_worker::{ReconcileWorker, ReconcileWorkerConfig};
pub use remote_applier::HttpRemoteApplier;
