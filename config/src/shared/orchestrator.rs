use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Settings of the migration task orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Maximum number of migration tasks executing at the same time.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u16,
    /// Time, in milliseconds, that shutdown waits for in-flight tasks before forcing a stop.
    #[serde(default = "default_shutdown_grace_period_ms")]
    pub shutdown_grace_period_ms: u64,
}

impl OrchestratorConfig {
    /// Default number of concurrently executing migration tasks.
    pub const DEFAULT_MAX_CONCURRENT_TASKS: u16 = 10;

    /// Default shutdown grace period in milliseconds.
    pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_MS: u64 = 60_000;

    /// Returns the shutdown grace period as a [`Duration`].
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    /// Validates orchestrator settings.
    ///
    /// Ensures the pool has room for at least one task.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "orchestrator.max_concurrent_tasks".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            shutdown_grace_period_ms: default_shutdown_grace_period_ms(),
        }
    }
}

fn default_max_concurrent_tasks() -> u16 {
    OrchestratorConfig::DEFAULT_MAX_CONCURRENT_TASKS
}

fn default_shutdown_grace_period_ms() -> u64 {
    OrchestratorConfig::DEFAULT_SHUTDOWN_GRACE_PERIOD_MS
}
