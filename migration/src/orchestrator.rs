use config::shared::OrchestratorConfig;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::concurrency::interrupt::{InterruptRx, InterruptTx, create_interrupt_channel};
use crate::concurrency::pending::PendingCounter;
use crate::error::{ErrorKind, MigrationResult, panic_detail};
use crate::migrator::ResourceMigrator;
use crate::stats::{MigrationStats, MigrationStatsSnapshot};
use crate::task::{MigrationTask, TaskId};
use crate::workers::{TaskPool, WorkerPool};
use crate::{bail, migration_error};

/// Outcome of the shutdown sequence, published once it finished.
type ShutdownOutcome = Option<MigrationResult<()>>;

/// Shared state of a [`MigrationOrchestrator`].
struct OrchestratorInner<M, P> {
    migrator: Arc<M>,
    pool: P,
    pending: PendingCounter,
    stats: Arc<MigrationStats>,
    next_task_id: AtomicU64,
    shutdown_grace_period: Duration,
    interrupt_tx: InterruptTx,
    shutdown_started: AtomicBool,
    shutdown_outcome: watch::Sender<ShutdownOutcome>,
}

impl<M, P> OrchestratorInner<M, P>
where
    M: ResourceMigrator,
    P: WorkerPool,
{
    /// Terminates the pool and then releases the migrator, whatever the termination outcome.
    async fn terminate_and_release(&self, interrupt_rx: InterruptRx) -> MigrationResult<()> {
        let mut errors = Vec::new();

        match AssertUnwindSafe(self.terminate_pool(interrupt_rx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errors.push(err),
            Err(payload) => errors.push(migration_error!(
                ErrorKind::PoolTerminationFailed,
                "Worker pool termination panicked",
                panic_detail(&*payload)
            )),
        }

        match AssertUnwindSafe(self.migrator.close()).catch_unwind().await {
            Ok(Ok(())) => info!(migrator = M::name(), "released resource migrator"),
            Ok(Err(err)) => {
                error!(migrator = M::name(), error = %err, "failed to release resource migrator");
                errors.push(migration_error!(
                    ErrorKind::ResourceReleaseFailed,
                    "Failed to release resource migrator",
                    detail = err.to_string(),
                    source: err
                ));
            }
            Err(payload) => {
                let detail = panic_detail(&*payload);
                error!(migrator = M::name(), panic = %detail, "resource migrator panicked while closing");
                errors.push(migration_error!(
                    ErrorKind::ResourceReleaseFailed,
                    "Resource migrator panicked while closing",
                    detail = detail
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Stops the pool, waiting up to the grace period before forcing it.
    async fn terminate_pool(&self, mut interrupt_rx: InterruptRx) -> MigrationResult<()> {
        let grace_period = self.shutdown_grace_period;
        info!(
            pending = self.pending.pending(),
            ?grace_period,
            "shutting down worker pool"
        );

        self.pool.initiate_shutdown();

        let drained = tokio::select! {
            biased;

            Ok(()) = interrupt_rx.changed() => None,
            drained = self.pool.await_termination(grace_period) => Some(drained),
        };

        let Some(drained) = drained else {
            warn!("worker pool shutdown interrupted, forcing termination");
            self.pool.force_shutdown().await?;

            bail!(
                ErrorKind::Interrupted,
                "Worker pool shutdown was interrupted"
            );
        };

        if drained? {
            info!("worker pool drained");
            return Ok(());
        }

        error!(
            ?grace_period,
            pending = self.pending.pending(),
            "worker pool did not drain within the grace period, forcing termination"
        );
        self.pool.force_shutdown().await
    }
}

impl<M, P> Drop for OrchestratorInner<M, P> {
    fn drop(&mut self) {
        if !self.shutdown_started.load(Ordering::Acquire) {
            warn!("migration orchestrator dropped without shutdown, the resource migrator was not released");
        }
    }
}

/// Coordinates the concurrent execution of migration units.
///
/// The orchestrator wraps each submitted descriptor into a [`MigrationTask`], tracks how many
/// tasks are pending, lets callers wait until none is left and finally shuts the worker pool
/// down, releasing the [`ResourceMigrator`] exactly once.
///
/// Cloning is cheap and every clone drives the same orchestrator, so submissions can come from
/// many threads or tasks at once.
pub struct MigrationOrchestrator<M, P = TaskPool> {
    inner: Arc<OrchestratorInner<M, P>>,
}

impl<M, P> MigrationOrchestrator<M, P>
where
    M: ResourceMigrator,
    P: WorkerPool,
{
    /// Creates an orchestrator dispatching tasks for `migrator` onto `pool`.
    pub fn new(config: &OrchestratorConfig, migrator: M, pool: P) -> Self {
        let (interrupt_tx, _) = create_interrupt_channel();
        let (shutdown_outcome, _) = watch::channel(None);

        Self {
            inner: Arc::new(OrchestratorInner {
                migrator: Arc::new(migrator),
                pool,
                pending: PendingCounter::new(),
                stats: Arc::new(MigrationStats::new()),
                next_task_id: AtomicU64::new(0),
                shutdown_grace_period: config.shutdown_grace_period(),
                interrupt_tx,
                shutdown_started: AtomicBool::new(false),
                shutdown_outcome,
            }),
        }
    }

    /// Submits one migration unit for asynchronous execution.
    ///
    /// The pending count is incremented before the task reaches the pool, so a concurrent
    /// [`MigrationOrchestrator::await_completion`] never observes zero while the unit is
    /// logically submitted. Failures of the unit itself are never reported here; the only error
    /// is [`ErrorKind::PoolShutdown`] when the orchestrator no longer accepts work, in which
    /// case the submission is rolled back.
    pub fn submit(&self, descriptor: M::Descriptor) -> MigrationResult<()> {
        if self.inner.shutdown_started.load(Ordering::Acquire) {
            bail!(
                ErrorKind::PoolShutdown,
                "Migration orchestrator does not accept new tasks",
                format!("Rejected {descriptor:?} because shutdown has started")
            );
        }

        let task_id: TaskId = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = MigrationTask::new(
            task_id,
            descriptor,
            self.inner.migrator.clone(),
            self.inner.stats.clone(),
            self.inner.pending.track(),
        );

        // If the pool rejects the task, dropping it releases its completion token.
        if let Err(err) = self.inner.pool.submit(Box::pin(async move {
            task.run().await;
        })) {
            warn!(task_id, error = %err, "worker pool rejected migration task");
            return Err(err);
        }

        debug!(task_id, "submitted migration task");

        Ok(())
    }

    /// Waits until every submitted task has finished.
    ///
    /// Returns immediately when nothing is pending. Fails with [`ErrorKind::Interrupted`] if the
    /// orchestrator is interrupted through [`MigrationOrchestrator::interrupt_tx`] while
    /// waiting; the pending count is left untouched and outstanding tasks keep running.
    pub async fn await_completion(&self) -> MigrationResult<()> {
        let mut interrupt_rx = self.inner.interrupt_tx.subscribe();

        let completed = tokio::select! {
            biased;

            _ = self.inner.pending.wait_for_zero() => true,
            Ok(()) = interrupt_rx.changed() => false,
        };

        if !completed {
            let pending = self.inner.pending.pending();
            warn!(pending, "waiting for migration tasks was interrupted");

            bail!(
                ErrorKind::Interrupted,
                "Waiting for migration tasks was interrupted",
                format!("{pending} tasks were still pending")
            );
        }

        debug!(stats = ?self.stats(), "all migration tasks completed");

        Ok(())
    }

    /// Shuts the worker pool down and releases the resource migrator.
    ///
    /// New work is refused, in-flight work gets the configured grace period to finish and is
    /// then cancelled. The migrator is closed exactly once as the final step on every path,
    /// including pool termination failures, interruption and cancellation of this future: the
    /// sequence runs as a detached task and every call, concurrent or repeated, waits for and
    /// returns the outcome of that single sequence.
    pub async fn shutdown(&self) -> MigrationResult<()> {
        let mut outcome_rx = self.inner.shutdown_outcome.subscribe();

        if self.inner.shutdown_started.swap(true, Ordering::AcqRel) {
            debug!("shutdown already started, waiting for its outcome");
        } else {
            let inner = self.inner.clone();
            let interrupt_rx = inner.interrupt_tx.subscribe();

            tokio::spawn(async move {
                let outcome = inner.terminate_and_release(interrupt_rx).await;
                inner.shutdown_outcome.send_replace(Some(outcome));
            });
        }

        let outcome = match outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(err) => {
                return Err(migration_error!(
                    ErrorKind::InvalidState,
                    "Shutdown outcome channel closed",
                    source: err
                ));
            }
        };

        outcome.unwrap_or_else(|| {
            Err(migration_error!(
                ErrorKind::InvalidState,
                "Shutdown finished without an outcome"
            ))
        })
    }

    /// Returns the number of submitted tasks that have not finished yet.
    pub fn pending(&self) -> u64 {
        self.inner.pending.pending()
    }

    /// Returns a snapshot of the outcomes of finished tasks.
    pub fn stats(&self) -> MigrationStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns the sender used to interrupt callers blocked in
    /// [`MigrationOrchestrator::await_completion`] or [`MigrationOrchestrator::shutdown`].
    pub fn interrupt_tx(&self) -> InterruptTx {
        self.inner.interrupt_tx.clone()
    }

    /// Returns whether [`MigrationOrchestrator::shutdown`] has been called.
    pub fn is_shutdown_started(&self) -> bool {
        self.inner.shutdown_started.load(Ordering::Acquire)
    }

    /// Returns the migrator shared by all tasks.
    pub fn migrator(&self) -> &M {
        &self.inner.migrator
    }

    /// Returns the worker pool executing the tasks.
    pub fn pool(&self) -> &P {
        &self.inner.pool
    }
}

impl<M> MigrationOrchestrator<M, TaskPool>
where
    M: ResourceMigrator,
{
    /// Creates an orchestrator backed by a [`TaskPool`] on the current tokio runtime.
    ///
    /// The pool capacity is [`OrchestratorConfig::max_concurrent_tasks`].
    pub fn with_task_pool(config: &OrchestratorConfig, migrator: M) -> MigrationResult<Self> {
        config.validate()?;
        let pool = TaskPool::new(usize::from(config.max_concurrent_tasks))?;

        Ok(Self::new(config, migrator, pool))
    }
}

impl<M, P> Clone for MigrationOrchestrator<M, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M, P> fmt::Debug for MigrationOrchestrator<M, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationOrchestrator")
            .field("pending", &self.inner.pending.pending())
            .field("stats", &self.inner.stats.snapshot())
            .field("shutdown_grace_period", &self.inner.shutdown_grace_period)
            .field(
                "shutdown_started",
                &self.inner.shutdown_started.load(Ordering::Acquire),
            )
            .finish_non_exhaustive()
    }
}
