use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;

use crate::error::MigrationResult;

/// Unit of work accepted by a [`WorkerPool`].
pub type PoolTask = BoxFuture<'static, ()>;

/// Capability interface of a bounded pool executing units of work concurrently.
///
/// The orchestrator only depends on this narrow surface so any concurrency primitive (a tokio
/// task set, a dedicated runtime, a thread pool bridged through channels) can execute its tasks.
pub trait WorkerPool: Send + Sync + 'static {
    /// Schedules `task` for asynchronous execution without blocking the caller.
    ///
    /// Fails with [`crate::error::ErrorKind::PoolShutdown`] once
    /// [`WorkerPool::initiate_shutdown`] has been called. A rejected task is dropped without
    /// being polled.
    fn submit(&self, task: PoolTask) -> MigrationResult<()>;

    /// Stops accepting new work. Queued and running work is allowed to finish.
    fn initiate_shutdown(&self);

    /// Waits up to `timeout` for all accepted work to finish.
    ///
    /// Returns `true` if the pool drained within the timeout.
    fn await_termination(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = MigrationResult<bool>> + Send;

    /// Cancels all remaining work and waits until it has been torn down.
    ///
    /// Work that cannot be cancelled promptly may be abandoned rather than awaited, so this
    /// returns in bounded time.
    fn force_shutdown(&self) -> impl Future<Output = MigrationResult<()>> + Send;
}
