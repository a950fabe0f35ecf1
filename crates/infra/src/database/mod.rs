//! SQLite adapters for the queue, identifier mappings and local snapshots

pub mod id_mapping_repository;
pub mod local_store;
pub mod manager;
pub mod queue_repository;

pub use id_mapping_repository::SqliteIdMappingRepository;
pub use local_store::SqliteLocalStore;
pub use manager::DbManager;
pub use queue_repository::SqliteQueueStore;
