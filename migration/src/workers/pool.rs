use std::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, MigrationResult};
use crate::workers::base::{PoolTask, WorkerPool};
use crate::{bail, migration_error};

/// Default time [`TaskPool::force_shutdown`] waits for aborted tasks to wind down.
const DEFAULT_ABORT_TIMEOUT: Duration = Duration::from_millis(500);

/// Internal state for [`TaskPool`].
#[derive(Debug)]
struct TaskPoolInner {
    /// Owns all spawned tasks, both queued on a permit and running.
    join_set: JoinSet<()>,
    /// Whether new tasks are accepted.
    accepting: bool,
}

/// Bounded pool executing migration tasks on a tokio runtime.
///
/// Every submitted task is spawned immediately, then waits for one of `capacity` permits
/// before running, so submission never blocks while at most `capacity` tasks execute at once.
/// The pool owns the spawned tasks through a [`JoinSet`], which lets shutdown either drain them
/// or abort them all.
///
/// Aborting only takes effect at the next `.await` of a task, so a task stuck in blocking or
/// CPU-bound code cannot be stopped. [`WorkerPool::force_shutdown`] waits for aborted tasks at
/// most the abort timeout and then abandons the ones still running.
#[derive(Debug, Clone)]
pub struct TaskPool {
    inner: Arc<Mutex<TaskPoolInner>>,
    /// Serializes draining, since the join set keeps a single waker.
    drain_lock: Arc<AsyncMutex<()>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    abort_timeout: Duration,
    runtime: Handle,
}

impl TaskPool {
    /// Creates a pool with `capacity` permits running on the current tokio runtime.
    pub fn new(capacity: usize) -> MigrationResult<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            migration_error!(
                ErrorKind::InvalidState,
                "Task pool requires a tokio runtime",
                source: err
            )
        })?;

        Self::with_runtime(capacity, runtime)
    }

    /// Creates a pool with `capacity` permits running on `runtime`.
    ///
    /// Tasks can then be submitted from any thread, including threads outside the runtime.
    pub fn with_runtime(capacity: usize, runtime: Handle) -> MigrationResult<Self> {
        if capacity == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Task pool capacity must be greater than zero"
            );
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(TaskPoolInner {
                join_set: JoinSet::new(),
                accepting: true,
            })),
            drain_lock: Arc::new(AsyncMutex::new(())),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            abort_timeout: DEFAULT_ABORT_TIMEOUT,
            runtime,
        })
    }

    /// Sets how long a forced shutdown waits for aborted tasks before abandoning them.
    pub fn with_abort_timeout(mut self, abort_timeout: Duration) -> Self {
        self.abort_timeout = abort_timeout;
        self
    }

    /// Returns the maximum number of tasks executing at the same time.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of tasks owned by the pool that have not been reaped yet.
    pub fn outstanding_tasks(&self) -> usize {
        self.lock_inner().join_set.len()
    }

    /// Returns whether the pool still accepts tasks.
    pub fn is_accepting(&self) -> bool {
        self.lock_inner().accepting
    }

    /// Waits until every owned task has finished, reaping their results.
    ///
    /// Concurrent callers take turns, so each of them is woken when the set empties.
    async fn drain(&self) {
        let _drain_guard = self.drain_lock.lock().await;

        poll_fn(|cx| {
            let mut inner = self.lock_inner();
            loop {
                match inner.join_set.poll_join_next(cx) {
                    Poll::Ready(Some(result)) => log_task_result(result),
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => return Poll::Pending,
                }
            }
        })
        .await
    }

    fn lock_inner(&self) -> MutexGuard<'_, TaskPoolInner> {
        // The inner state stays consistent even if a holder panicked, since every critical
        // section is a single join set or flag operation.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkerPool for TaskPool {
    fn submit(&self, task: PoolTask) -> MigrationResult<()> {
        let mut inner = self.lock_inner();
        if !inner.accepting {
            bail!(
                ErrorKind::PoolShutdown,
                "Task pool does not accept new tasks",
                "The pool has been shut down"
            );
        }

        // Reap finished tasks so the join set does not grow with the total number of submissions.
        while let Some(result) = inner.join_set.try_join_next() {
            log_task_result(result);
        }

        let permits = self.permits.clone();
        inner.join_set.spawn_on(
            async move {
                // The semaphore is never closed, so acquisition only fails if that changes.
                let Ok(_permit) = permits.acquire_owned().await else {
                    warn!("task pool permits closed, dropping task");
                    return;
                };

                task.await;
            },
            &self.runtime,
        );

        Ok(())
    }

    fn initiate_shutdown(&self) {
        let mut inner = self.lock_inner();
        if inner.accepting {
            inner.accepting = false;
            info!(
                outstanding = inner.join_set.len(),
                "task pool stopped accepting tasks"
            );
        }
    }

    async fn await_termination(&self, timeout: Duration) -> MigrationResult<bool> {
        let drained = tokio::time::timeout(timeout, self.drain()).await.is_ok();
        if drained {
            debug!("task pool drained");
        }

        Ok(drained)
    }

    async fn force_shutdown(&self) -> MigrationResult<()> {
        {
            let mut inner = self.lock_inner();
            inner.accepting = false;

            warn!(
                outstanding = inner.join_set.len(),
                "aborting all outstanding tasks in task pool"
            );
            inner.join_set.abort_all();
        }

        // Aborted tasks resolve at their next await point, tasks that never reach one are
        // abandoned once the abort timeout elapses.
        if tokio::time::timeout(self.abort_timeout, self.drain())
            .await
            .is_err()
        {
            warn!(
                abandoned = self.outstanding_tasks(),
                abort_timeout = ?self.abort_timeout,
                "abandoning task pool tasks that did not stop after being aborted"
            );
        }

        Ok(())
    }
}

/// Logs the result of a reaped task.
fn log_task_result(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => debug!("task pool task was cancelled"),
        Err(err) => error!(error = %err, "task pool task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_tasks_than_capacity() {
        let pool = TaskPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let max_running = max_running.clone();
            pool.submit(Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.initiate_shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)).await.unwrap());
        assert_eq!(max_running.load(Ordering::SeqCst), 2);
        assert_eq!(pool.outstanding_tasks(), 0);
    }

    #[tokio::test]
    async fn rejects_tasks_after_shutdown_and_drops_them() {
        let pool = TaskPool::new(1).unwrap();
        pool.initiate_shutdown();

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let err = pool
            .submit(Box::pin(async move {
                let _guard = guard;
            }))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PoolShutdown);
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!pool.is_accepting());
    }

    #[tokio::test]
    async fn force_shutdown_cancels_tasks_past_the_timeout() {
        let pool = TaskPool::new(1).unwrap();
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());

        pool.submit(Box::pin(async move {
            let _guard = guard;
            sleep(Duration::from_secs(30)).await;
        }))
        .unwrap();

        pool.initiate_shutdown();
        assert!(
            !pool
                .await_termination(Duration::from_millis(50))
                .await
                .unwrap()
        );

        pool.force_shutdown().await.unwrap();
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(pool.outstanding_tasks(), 0);
    }

    #[tokio::test]
    async fn panicking_task_does_not_affect_other_tasks() {
        let pool = TaskPool::new(2).unwrap();
        let completed = Arc::new(AtomicBool::new(false));

        pool.submit(Box::pin(async {
            if true {
                panic!("boom");
            }
        }))
        .unwrap();
        let flag = completed.clone();
        pool.submit(Box::pin(async move {
            sleep(Duration::from_millis(10)).await;
            flag.store(true, Ordering::SeqCst);
        }))
        .unwrap();

        pool.initiate_shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)).await.unwrap());
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn force_shutdown_abandons_tasks_that_never_yield() {
        let pool = TaskPool::new(2)
            .unwrap()
            .with_abort_timeout(Duration::from_millis(100));

        pool.submit(Box::pin(async {
            std::thread::sleep(Duration::from_secs(2));
        }))
        .unwrap();
        sleep(Duration::from_millis(20)).await;

        pool.initiate_shutdown();
        let started = std::time::Instant::now();
        pool.force_shutdown().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.outstanding_tasks(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_drains_all_observe_termination() {
        let pool = TaskPool::new(2).unwrap();
        pool.submit(Box::pin(async {
            sleep(Duration::from_millis(50)).await;
        }))
        .unwrap();
        pool.initiate_shutdown();

        let (first, second) = tokio::join!(
            pool.await_termination(Duration::from_secs(2)),
            pool.await_termination(Duration::from_secs(2)),
        );

        assert!(first.unwrap());
        assert!(second.unwrap());
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let err = TaskPool::new(0).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
