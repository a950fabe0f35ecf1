//! Command handlers.

use anyhow::{Context, Result};
use offsync_domain::{EntityType, ResetFilter};
use offsync_infra::{config, init_tracing, SyncEngine};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::output::{self, Output};
use crate::{Cli, Command};

/// Load configuration, open the engine and run `cli.command`.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = config::load(cli.config).context("failed to load configuration")?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    if let Command::Reconcile { purge: Some(days) } = &cli.command {
        config.reconcile.retention_days = Some(*days);
    }

    init_tracing(&config.logging).context("failed to initialise logging")?;

    let engine = SyncEngine::open(config).context("failed to open the sync engine")?;
    let out = Output::new(cli.json);

    match cli.command {
        Command::Status { failed: false } => {
            let summary = engine.service.status_summary().await?;
            out.emit(&summary, || output::status_summary(&summary))
        }
        Command::Status { failed: true } => {
            let summary = engine.service.failed_summary().await?;
            out.emit(&summary, || output::failed_summary(&summary))
        }
        Command::Pending { limit } => {
            let records = engine.service.pending(limit).await?;
            out.emit(&records, || output::records(&records))
        }
        Command::ResetFailed { entity, max_retries, retryable_only } => {
            let mut filter = ResetFilter::all();
            if let Some(entity) = entity {
                filter = filter.for_entity(parse_entity(&entity)?);
            }
            if let Some(ceiling) = max_retries {
                filter = filter.below_retry_count(ceiling);
            }
            if retryable_only {
                filter = filter.retryable_only();
            }
            let reset = engine.service.reset_failed(&filter).await?;
            out.emit(&json!({ "reset": reset }), || format!("{reset} failed operation(s) reset"))
        }
        Command::Reprioritize { from_schema: true, .. } => {
            let updated = engine.service.apply_schema_priorities().await?;
            out.emit(&json!({ "updated": updated }), || {
                format!("{updated} pending operation(s) moved to their schema priority")
            })
        }
        Command::Reprioritize { entity, priority, from_schema: false } => {
            let entity = parse_entity(entity.as_deref().unwrap_or_default())?;
            let priority = priority.context("a priority is required")?;
            let updated = engine.service.reprioritize(&entity, priority).await?;
            out.emit(&json!({ "updated": updated }), || {
                format!("{updated} pending {entity} operation(s) moved to priority {priority}")
            })
        }
        Command::Resync => {
            let report = engine.service.queue_full_resync().await?;
            out.emit(&report, || output::resync(&report))
        }
        Command::Reconcile { .. } => {
            let report = engine.reconciler.run().await?;
            out.emit(&report, || output::reconcile(&report))
        }
        Command::Map { entity, local_id, remote_id } => {
            let entity = parse_entity(&entity)?;
            let mapping = engine.service.record_alias(&entity, &local_id, &remote_id).await?;
            out.emit(&mapping, || {
                format!("{}/{} -> {}", mapping.entity_type, mapping.entity_id, mapping.remote_id)
            })
        }
        Command::Dispatch => {
            engine.dispatcher.recover().await?;
            let report = engine.dispatcher.run_cycle(&CancellationToken::new()).await?;
            out.emit(&report, || output::cycle(&report))
        }
        Command::Run => run_workers(&engine).await,
    }
}

async fn run_workers(engine: &SyncEngine) -> Result<()> {
    let (mut dispatch, mut reconcile) = engine.workers();
    dispatch.start().await?;
    reconcile.start().await?;
    dispatch.trigger();
    info!("workers running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    let dispatch_stopped = dispatch.stop().await;
    reconcile.stop().await?;
    dispatch_stopped?;
    Ok(())
}

fn parse_entity(name: &str) -> Result<EntityType> {
    EntityType::new(name).with_context(|| format!("invalid entity type '{name}'"))
}
