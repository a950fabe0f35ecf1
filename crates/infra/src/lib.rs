//! # offsync Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - SQLite queue store, identifier mappings and local snapshot store
//! - HTTP remote applier
//! - Background dispatch and reconcile workers
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Implements traits defined in `offsync-core`
//! - Contains all "impure" code (I/O, network, filesystem)

pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod http;
pub mod observability;
pub mod sync;

// Re-export commonly used items
pub use database::{
    DbManager, SqliteIdMappingRepository, SqliteLocalStore, SqliteQueueStore,
};
pub use engine::SyncEngine;
pub use errors::InfraError;
pub use observability::init_tracing;
pub use sync::{
    DispatchWorker, DispatchWorkerConfig, HttpRemoteApplier, ReconcileWorker,
    ReconcileWorkerConfig, SyncError,
};
