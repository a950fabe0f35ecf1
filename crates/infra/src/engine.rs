//! Wiring of the SQLite and HTTP adapters into the core engine.

use std::sync::Arc;

use offsync_core::{
    DependencyResolver, Dispatcher, IdMappingRepository, LocalStore, QueueStore, Reconciler,
    RemoteApplier, SyncService,
};
use offsync_domain::{AppConfig, OffsyncError, Result, SyncSchema};
use tracing::info;

use crate::database::manager::pool_config;
use crate::database::{DbManager, SqliteIdMappingRepository, SqliteLocalStore, SqliteQueueStore};
use crate::sync::{
    DispatchWorker, DispatchWorkerConfig, HttpRemoteApplier, ReconcileWorker,
    ReconcileWorkerConfig,
};

/// Every engine component built from one configuration.
pub struct SyncEngine {
    pub config: AppConfig,
    pub db: Arc<DbManager>,
    pub store: Arc<dyn QueueStore>,
    pub mappings: Arc<dyn IdMappingRepository>,
    pub local: Arc<dyn LocalStore>,
    pub service: Arc<SyncService>,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: Arc<Reconciler>,
}

impl SyncEngine {
    /// Open the databases, run migrations and build the HTTP applier.
    pub fn open(config: AppConfig) -> Result<Self> {
        let applier = HttpRemoteApplier::new(config.remote.clone())
            .map_err(|e| OffsyncError::Config(e.to_string()))?;
        let remote: Arc<dyn RemoteApplier> = Arc::new(applier);
        Self::with_remote(config, remote)
    }

    /// Like [`open`](Self::open) with a caller-supplied remote applier.
    pub fn with_remote(config: AppConfig, remote: Arc<dyn RemoteApplier>) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::from_config(&config.database)?);
        db.run_migrations()?;

        let local_db = if config.database.local_path() == db.path() {
            Arc::clone(&db)
        } else {
            Arc::new(DbManager::with_pool_config(
                config.database.local_path(),
                pool_config(&config.database),
            )?)
        };

        let schema: Arc<SyncSchema> = Arc::new(config.schema.clone());
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::new(Arc::clone(&db)));
        let mappings: Arc<dyn IdMappingRepository> =
            Arc::new(SqliteIdMappingRepository::new(Arc::clone(&db)));
        let local: Arc<dyn LocalStore> =
            Arc::new(SqliteLocalStore::new(local_db, Arc::clone(&schema)));

        let service = Arc::new(SyncService::new(
            Arc::clone(&store),
            Arc::clone(&mappings),
            Arc::clone(&local),
            Arc::clone(&schema),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&mappings),
            remote,
            DependencyResolver::new(Arc::clone(&schema)),
            config.dispatch.clone(),
        )?);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&mappings),
            Arc::clone(&local),
            DependencyResolver::new(schema),
            config.reconcile.clone(),
        ));

        info!(
            db_path = %db.path().display(),
            entity_types = config.schema.entities.len(),
            "sync engine ready"
        );

        Ok(Self { config, db, store, mappings, local, service, dispatcher, reconciler })
    }

    /// Workers for the configured intervals, with missing parents flowing
    /// from dispatch to reconcile.
    pub fn workers(&self) -> (DispatchWorker, ReconcileWorker) {
        let dispatch = DispatchWorker::new(
            Arc::clone(&self.dispatcher),
            DispatchWorkerConfig::from(&self.config.dispatch),
        );
        let reconcile = ReconcileWorker::new(
            Arc::clone(&self.reconciler),
            ReconcileWorkerConfig::from(&self.config.reconcile),
        )
        .with_missing_parents(dispatch.missing_parents());
        (dispatch, reconcile)
    }
}
