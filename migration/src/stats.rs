//! Outcome counters of executed migration tasks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals of migration outcomes, shared by all tasks of an orchestrator.
#[derive(Debug, Default)]
pub struct MigrationStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl MigrationStats {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one successfully migrated unit.
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one failed unit.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> MigrationStatsSnapshot {
        MigrationStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MigrationStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
}

impl MigrationStatsSnapshot {
    /// Total number of units that finished, whatever their outcome.
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed
    }
}
