use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::migrator::ResourceMigrator;

#[derive(Debug)]
struct Inner<D> {
    migrated: Vec<D>,
    close_calls: usize,
}

/// In-memory migrator for development and testing.
///
/// [`MemoryMigrator`] records every descriptor it migrates and how many times it was closed.
/// Once closed it refuses further migrations, which makes use-after-release visible.
#[derive(Debug)]
pub struct MemoryMigrator<D> {
    inner: Arc<Mutex<Inner<D>>>,
}

impl<D> MemoryMigrator<D>
where
    D: Clone,
{
    /// Creates a new empty memory migrator.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                migrated: Vec::new(),
                close_calls: 0,
            })),
        }
    }

    /// Returns a copy of all migrated descriptors in completion order.
    pub async fn migrated(&self) -> Vec<D> {
        self.inner.lock().await.migrated.clone()
    }

    /// Returns how many times [`ResourceMigrator::close`] was invoked.
    pub async fn close_calls(&self) -> usize {
        self.inner.lock().await.close_calls
    }
}

impl<D> Clone for MemoryMigrator<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D> Default for MemoryMigrator<D>
where
    D: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D> ResourceMigrator for MemoryMigrator<D>
where
    D: fmt::Debug + Clone + Send + Sync + 'static,
{
    type Descriptor = D;

    fn name() -> &'static str {
        "memory"
    }

    async fn migrate(&self, descriptor: &D) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.close_calls > 0 {
            bail!(
                ErrorKind::InvalidState,
                "Memory migrator is closed",
                format!("Refusing to migrate {descriptor:?}")
            );
        }

        debug!(?descriptor, "migrating resource in memory");
        inner.migrated.push(descriptor.clone());

        Ok(())
    }

    async fn close(&self) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.close_calls += 1;

        info!(
            migrated = inner.migrated.len(),
            "closed memory migrator"
        );

        Ok(())
    }
}
