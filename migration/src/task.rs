use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use crate::concurrency::pending::CompletionToken;
use crate::error::{ErrorKind, MigrationResult, panic_detail};
use crate::failpoints::{MIGRATION_TASK_BEFORE_MIGRATE, migration_fail_point};
use crate::migration_error;
use crate::migrator::ResourceMigrator;
use crate::stats::MigrationStats;

/// Identifier assigned to a migration task at submission time.
pub type TaskId = u64;

/// Lifecycle of a single migration task.
///
/// `Created → Running → {Succeeded | Failed} → Reported`, where `Reported` is terminal and is
/// reached from both outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTaskState {
    Created,
    Running,
    Succeeded,
    Failed,
    Reported,
}

impl MigrationTaskState {
    /// Returns whether moving from `self` to `next` follows the task lifecycle.
    fn can_transition_to(self, next: MigrationTaskState) -> bool {
        use MigrationTaskState::*;

        matches!(
            (self, next),
            (Created, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Reported)
                | (Failed, Reported)
        )
    }
}

/// Single-use binding of one descriptor to the migrator that migrates it.
///
/// The task owns the [`CompletionToken`] handed out by the orchestrator when it was submitted.
/// [`MigrationTask::run`] releases it after the migration attempt, and dropping a task that
/// never ran releases it as well, so every submitted task is reported exactly once.
#[derive(Debug)]
pub struct MigrationTask<M>
where
    M: ResourceMigrator,
{
    id: TaskId,
    descriptor: M::Descriptor,
    migrator: Arc<M>,
    stats: Arc<MigrationStats>,
    completion: CompletionToken,
    state: MigrationTaskState,
}

impl<M> MigrationTask<M>
where
    M: ResourceMigrator,
{
    /// Creates a new task in the [`MigrationTaskState::Created`] state.
    pub fn new(
        id: TaskId,
        descriptor: M::Descriptor,
        migrator: Arc<M>,
        stats: Arc<MigrationStats>,
        completion: CompletionToken,
    ) -> Self {
        Self {
            id,
            descriptor,
            migrator,
            stats,
            completion,
            state: MigrationTaskState::Created,
        }
    }

    /// Returns the id of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the descriptor bound to the task.
    pub fn descriptor(&self) -> &M::Descriptor {
        &self.descriptor
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> MigrationTaskState {
        self.state
    }

    /// Migrates the bound descriptor once, then reports completion.
    ///
    /// Errors and panics raised by the migrator are logged and counted as failures; they never
    /// escape the task. Returns the terminal [`MigrationTaskState::Reported`] state.
    pub async fn run(mut self) -> MigrationTaskState {
        self.transition(MigrationTaskState::Running);

        match self.execute().await {
            Ok(()) => {
                self.stats.record_success();
                self.transition(MigrationTaskState::Succeeded);
            }
            Err(err) => {
                error!(
                    task_id = self.id,
                    migrator = M::name(),
                    descriptor = ?self.descriptor,
                    error = %err,
                    "migration task failed"
                );
                self.stats.record_failure();
                self.transition(MigrationTaskState::Failed);
            }
        }

        // Statistics are updated before completion is reported, so whoever observes the pending
        // count reaching zero also observes the final statistics.
        self.report()
    }

    async fn execute(&self) -> MigrationResult<()> {
        let attempt = async {
            migration_fail_point(MIGRATION_TASK_BEFORE_MIGRATE)?;
            self.migrator.migrate(&self.descriptor).await
        };

        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(migration_error!(
                ErrorKind::MigrationTaskPanic,
                "Migrator panicked while migrating a resource",
                panic_detail(&*payload)
            )),
        }
    }

    fn report(mut self) -> MigrationTaskState {
        self.transition(MigrationTaskState::Reported);

        let MigrationTask {
            id,
            completion,
            state,
            ..
        } = self;
        completion.complete();

        debug!(task_id = id, "migration task reported completion");

        state
    }

    fn transition(&mut self, next: MigrationTaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid migration task transition from {:?} to {:?}",
            self.state,
            next
        );

        self.state = next;
    }
}
