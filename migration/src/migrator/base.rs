use std::fmt;
use std::future::Future;

use crate::error::MigrationResult;

/// Trait for systems that migrate a single resource at a time.
///
/// A [`ResourceMigrator`] is shared by all migration tasks of an orchestrator, so
/// [`ResourceMigrator::migrate`] may be invoked concurrently from many workers and must be safe
/// to call in parallel. The migrator typically owns downstream resources (connections, file
/// handles, sessions) that are released by [`ResourceMigrator::close`].
///
/// Retries, if desired, are the responsibility of the implementation and hidden behind
/// [`ResourceMigrator::migrate`]; the orchestrator attempts every descriptor exactly once.
pub trait ResourceMigrator: Send + Sync + 'static {
    /// Opaque descriptor identifying one resource to migrate.
    type Descriptor: fmt::Debug + Send + Sync + 'static;

    /// Returns the name of the migrator, used in logs.
    fn name() -> &'static str;

    /// Migrates the resource identified by `descriptor`.
    fn migrate(
        &self,
        descriptor: &Self::Descriptor,
    ) -> impl Future<Output = MigrationResult<()>> + Send;

    /// Releases the resources owned by the migrator.
    ///
    /// The orchestrator calls this exactly once, as the last step of its shutdown, after the
    /// worker pool stopped. Implementations are not required to tolerate a second call.
    fn close(&self) -> impl Future<Output = MigrationResult<()>> + Send;
}
