//! Background reconcile loop.
//!
//! Audits the queue on its own interval, independent of dispatch, and feeds
//! in the missing parents the dispatch worker has reported since the last
//! pass.

use std::sync::Arc;
use std::time::Duration;

use offsync_core::{ReconcileReport, Reconciler};
use offsync_domain::{OffsyncError, ReconcileConfig, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::dispatch_worker::MissingParentInbox;

/// Configuration for the reconcile worker.
#[derive(Debug, Clone)]
pub struct ReconcileWorkerConfig {
    /// Interval between passes
    pub interval: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for ReconcileWorkerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(300), join_timeout: Duration::from_secs(10) }
    }
}

impl From<&ReconcileConfig> for ReconcileWorkerConfig {
    fn from(config: &ReconcileConfig) -> Self {
        Self { interval: config.interval(), ..Self::default() }
    }
}

/// Reconcile worker with explicit lifecycle management.
pub struct ReconcileWorker {
    reconciler: Arc<Reconciler>,
    config: ReconcileWorkerConfig,
    inbox: Option<MissingParentInbox>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ReconcileWorker {
    /// Construct a stopped worker; call [`Self::start`] to run it.
    pub fn new(reconciler: Arc<Reconciler>, config: ReconcileWorkerConfig) -> Self {
        Self {
            reconciler,
            config,
            inbox: None,
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Also check missing parents collected by a dispatch worker.
    #[must_use]
    pub fn with_missing_parents(mut self, inbox: MissingParentInbox) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Start the worker, spawning the background audit task.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(OffsyncError::Internal("reconcile worker already running".into()));
        }

        info!(interval_secs = self.config.interval.as_secs(), "starting reconcile worker");
        self.cancellation = CancellationToken::new();

        let reconciler = Arc::clone(&self.reconciler);
        let inbox = self.inbox.clone();
        let interval = self.config.interval;
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("reconcile loop cancelled");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = Self::pass(&reconciler, inbox.as_ref()).await {
                            error!(error = %e, "reconcile pass failed");
                        }
                    }
                }
            }
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for a running pass to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(OffsyncError::Internal("reconcile worker not running".into()));
        }

        info!("stopping reconcile worker");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "reconcile worker task panicked");
                    return Err(OffsyncError::Internal("reconcile worker task panicked".into()));
                }
                Err(_) => {
                    warn!("reconcile worker did not complete within timeout");
                    return Err(OffsyncError::Internal("reconcile worker stop timed out".into()));
                }
            }
        }

        self.cancellation = CancellationToken::new();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Run one pass immediately, outside the schedule.
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        Self::pass(&self.reconciler, self.inbox.as_ref()).await
    }

    async fn pass(
        reconciler: &Reconciler,
        inbox: Option<&MissingParentInbox>,
    ) -> Result<ReconcileReport> {
        let reported = match inbox {
            Some(inbox) => std::mem::take(&mut *inbox.lock().await),
            None => Vec::new(),
        };

        let report = reconciler.run_with(&reported).await?;
        if report.is_clean() {
            debug!("reconcile pass found nothing to repair");
        } else {
            info!(
                orphans_requeued = report.orphans_requeued,
                mappings_backfilled = report.mappings_backfilled,
                mappings_requeued = report.mappings_requeued,
                parents_enqueued = report.parents_enqueued,
                failed_reset = report.failed_reset,
                reprioritized = report.reprioritized,
                purged = report.purged,
                escalations = report.escalations.len(),
                "reconcile pass finished"
            );
        }
        Ok(report)
    }
}

impl Drop for ReconcileWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ReconcileWorker dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
