//! Shared test helpers for `offsync-core` integration tests.
//!
//! In-memory doubles for every port so engine scenarios run without a
//! database or network.

#![allow(dead_code)]

pub mod local;
pub mod remote;
pub mod store;

use std::sync::Arc;

use offsync_core::{DependencyResolver, Dispatcher, Reconciler, SyncService};
use offsync_domain::{DispatchConfig, EntityType, ReconcileConfig, SyncSchema};

pub use local::InMemoryLocalStore;
pub use remote::{MockRemote, RemoteCall};
pub use store::InMemorySyncStore;

pub fn t(name: &str) -> EntityType {
    EntityType::new(name).expect("valid entity type")
}

pub fn schema() -> Arc<SyncSchema> {
    Arc::new(SyncSchema::point_of_sale())
}

/// Dispatch settings with millisecond backoff.
pub fn fast_dispatch() -> DispatchConfig {
    DispatchConfig {
        max_in_cycle_attempts: 3,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 2,
        ..DispatchConfig::default()
    }
}

/// Everything a scenario needs, wired against one shared store.
pub struct Harness {
    pub store: InMemorySyncStore,
    pub remote: Arc<MockRemote>,
    pub local: InMemoryLocalStore,
    pub schema: Arc<SyncSchema>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: InMemorySyncStore::new(),
            remote: Arc::new(MockRemote::new()),
            local: InMemoryLocalStore::new(),
            schema: schema(),
        }
    }

    pub fn resolver(&self) -> DependencyResolver {
        DependencyResolver::new(self.schema.clone())
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher_with(fast_dispatch())
    }

    pub fn dispatcher_with(&self, config: DispatchConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            self.remote.clone(),
            self.resolver(),
            config,
        )
        .expect("valid dispatch config")
    }

    pub fn reconciler(&self) -> Reconciler {
        self.reconciler_with(ReconcileConfig::default())
    }

    pub fn reconciler_with(&self, config: ReconcileConfig) -> Reconciler {
        Reconciler::new(
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.local.clone()),
            self.resolver(),
            config,
        )
        .with_clock(Arc::new(self.store.clock()))
    }

    pub fn service(&self) -> SyncService {
        SyncService::new(
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.local.clone()),
            self.schema.clone(),
        )
        .with_clock(Arc::new(self.store.clock()))
    }
}
