#![allow(dead_code)]

use migration::bail;
use migration::error::{ErrorKind, MigrationResult};
use migration::migrator::ResourceMigrator;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// What a [`TestMigrator`] does when it migrates a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Succeed,
    Fail,
    Panic,
}

/// Descriptor understood by [`TestMigrator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestDescriptor {
    pub id: u64,
    pub outcome: Outcome,
    pub delay: Duration,
    /// Whether the delay blocks the worker thread instead of yielding.
    pub blocking: bool,
}

impl TestDescriptor {
    pub fn succeeding(id: u64) -> Self {
        Self {
            id,
            outcome: Outcome::Succeed,
            delay: Duration::ZERO,
            blocking: false,
        }
    }

    pub fn failing(id: u64) -> Self {
        Self {
            outcome: Outcome::Fail,
            ..Self::succeeding(id)
        }
    }

    pub fn panicking(id: u64) -> Self {
        Self {
            outcome: Outcome::Panic,
            ..Self::succeeding(id)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_blocking_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self.blocking = true;
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    migrated: Mutex<HashSet<u64>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    close_calls: AtomicUsize,
    fail_close: bool,
}

/// Migrator whose per-descriptor behavior is scripted by the descriptor itself.
///
/// Tracks successfully migrated ids, the peak number of concurrent migrations and the number
/// of close calls.
#[derive(Debug, Clone, Default)]
pub struct TestMigrator {
    inner: Arc<Inner>,
}

impl TestMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a migrator whose release always fails.
    pub fn failing_close() -> Self {
        Self {
            inner: Arc::new(Inner {
                fail_close: true,
                ..Default::default()
            }),
        }
    }

    pub async fn migrated(&self) -> HashSet<u64> {
        self.inner.migrated.lock().await.clone()
    }

    pub fn max_running(&self) -> usize {
        self.inner.max_running.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }
}

impl ResourceMigrator for TestMigrator {
    type Descriptor = TestDescriptor;

    fn name() -> &'static str {
        "test"
    }

    async fn migrate(&self, descriptor: &TestDescriptor) -> MigrationResult<()> {
        let running = self.inner.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_running.fetch_max(running, Ordering::SeqCst);

        if descriptor.blocking {
            std::thread::sleep(descriptor.delay);
        } else if !descriptor.delay.is_zero() {
            tokio::time::sleep(descriptor.delay).await;
        }
        self.inner.running.fetch_sub(1, Ordering::SeqCst);

        match descriptor.outcome {
            Outcome::Succeed => {
                self.inner.migrated.lock().await.insert(descriptor.id);
                Ok(())
            }
            Outcome::Fail => bail!(
                ErrorKind::MigrationFailed,
                "Scripted migration failure",
                format!("descriptor {}", descriptor.id)
            ),
            Outcome::Panic => panic!("scripted panic for descriptor {}", descriptor.id),
        }
    }

    async fn close(&self) -> MigrationResult<()> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);

        if self.inner.fail_close {
            bail!(ErrorKind::IoError, "Scripted close failure");
        }

        Ok(())
    }
}
