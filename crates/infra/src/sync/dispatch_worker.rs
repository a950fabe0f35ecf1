//! Background dispatch loop.
//!
//! Runs stale in-flight recovery once on start, then a dispatch cycle every
//! interval or whenever [`DispatchWorker::trigger`] is called. Join handles
//! are tracked and cancellation is explicit; a cycle that overruns its
//! timeout is cancelled between records instead of being dropped mid-call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use offsync_core::{CycleReport, Dispatcher, MissingParentReport};
use offsync_domain::{DispatchConfig, OffsyncError, Result};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Missing parents reported by dispatch, drained by the reconcile worker.
pub type MissingParentInbox = Arc<Mutex<Vec<MissingParentReport>>>;

/// Configuration for the dispatch worker.
#[derive(Debug, Clone)]
pub struct DispatchWorkerConfig {
    /// Interval between cycles
    pub poll_interval: Duration,
    /// Budget for one cycle before it is asked to stop
    pub cycle_timeout: Duration,
    /// Back-to-back cycles per tick while records keep completing
    pub max_drain_cycles: usize,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for DispatchWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            cycle_timeout: Duration::from_secs(300),
            max_drain_cycles: 10,
            join_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&DispatchConfig> for DispatchWorkerConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self { poll_interval: config.interval(), ..Self::default() }
    }
}

/// Dispatch worker with explicit lifecycle management.
pub struct DispatchWorker {
    dispatcher: Arc<Dispatcher>,
    config: DispatchWorkerConfig,
    trigger: Arc<Notify>,
    missing_parents: MissingParentInbox,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Construct a stopped worker; call [`Self::start`] to run it.
    pub fn new(dispatcher: Arc<Dispatcher>, config: DispatchWorkerConfig) -> Self {
        Self {
            dispatcher,
            config,
            trigger: Arc::new(Notify::new()),
            missing_parents: Arc::new(Mutex::new(Vec::new())),
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Shared inbox of missing parents seen by recent cycles.
    pub fn missing_parents(&self) -> MissingParentInbox {
        Arc::clone(&self.missing_parents)
    }

    /// Start the worker, spawning the background processing task.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(OffsyncError::Internal("dispatch worker already running".into()));
        }

        info!(interval_secs = self.config.poll_interval.as_secs(), "starting dispatch worker");

        // Create fresh cancellation token
        self.cancellation = CancellationToken::new();

        let dispatcher = Arc::clone(&self.dispatcher);
        let trigger = Arc::clone(&self.trigger);
        let inbox = Arc::clone(&self.missing_parents);
        let config = self.config.clone();
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            Self::process_loop(dispatcher, trigger, inbox, config, cancel).await;
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for the current record to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(OffsyncError::Internal("dispatch worker not running".into()));
        }

        info!("stopping dispatch worker");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "dispatch worker task panicked");
                    return Err(OffsyncError::Internal("dispatch worker task panicked".into()));
                }
                Err(_) => {
                    warn!("dispatch worker did not complete within timeout");
                    return Err(OffsyncError::Internal("dispatch worker stop timed out".into()));
                }
            }
        }

        info!("dispatch worker stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    /// Returns true when a worker instance is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Run a cycle now instead of waiting for the next tick.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Clear an authentication halt and dispatch immediately.
    pub fn resume(&self) {
        self.dispatcher.resume();
        self.trigger();
    }

    async fn process_loop(
        dispatcher: Arc<Dispatcher>,
        trigger: Arc<Notify>,
        inbox: MissingParentInbox,
        config: DispatchWorkerConfig,
        cancel: CancellationToken,
    ) {
        if let Err(e) = dispatcher.recover().await {
            error!(error = %e, "stale in-flight recovery failed");
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("dispatch loop cancelled");
                    break;
                }
                () = tokio::time::sleep(config.poll_interval) => {}
                () = trigger.notified() => debug!("dispatch triggered"),
            }

            for _ in 0..config.max_drain_cycles.max(1) {
                let report = match Self::run_cycle(&dispatcher, &config, &cancel).await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(error = %e, "dispatch cycle aborted");
                        break;
                    }
                };

                if !report.missing_parents.is_empty() {
                    let mut pending = inbox.lock().await;
                    for missing in report.missing_parents.iter().cloned() {
                        if !pending.contains(&missing) {
                            pending.push(missing);
                        }
                    }
                }

                if report.is_idle() || report.halted || report.cancelled || cancel.is_cancelled()
                {
                    break;
                }
            }
        }
    }

    async fn run_cycle(
        dispatcher: &Dispatcher,
        config: &DispatchWorkerConfig,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let cycle_cancel = cancel.child_token();
        let cycle = dispatcher.run_cycle(&cycle_cancel);
        tokio::pin!(cycle);

        let report = tokio::select! {
            result = &mut cycle => result?,
            () = tokio::time::sleep(config.cycle_timeout) => {
                warn!(
                    timeout_secs = config.cycle_timeout.as_secs(),
                    "dispatch cycle overran, cancelling"
                );
                cycle_cancel.cancel();
                cycle.await?
            }
        };

        if !report.is_idle() || !report.missing_parents.is_empty() {
            info!(
                attempted = report.attempted,
                completed = report.completed,
                failed = report.failed,
                deferred = report.deferred,
                retried = report.retried,
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "dispatch cycle finished"
            );
        }
        Ok(report)
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("DispatchWorker dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
