//! Offline-first sync engine
//!
//! Local mutation -> [`SyncService::record_mutation`](service::SyncService)
//! -> [`QueueStore`](ports::QueueStore) -> [`Dispatcher`](dispatcher::Dispatcher)
//! -> [`RemoteApplier`](ports::RemoteApplier), with the
//! [`Reconciler`](reconciler::Reconciler) auditing the queue on its own
//! schedule.

pub mod dependency;
pub mod dispatcher;
pub mod ports;
pub mod reconciler;
pub mod service;
