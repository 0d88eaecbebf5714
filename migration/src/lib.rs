//! Concurrent orchestration of independent migration units.
//!
//! A [`orchestrator::MigrationOrchestrator`] accepts opaque migration descriptors, wraps each
//! one into a [`task::MigrationTask`] bound to a [`migrator::ResourceMigrator`], and dispatches
//! it to a [`workers::WorkerPool`]. Callers can wait until every submitted unit finished and
//! finally shut the pool down, which releases the migrator exactly once.

pub mod concurrency;
pub mod error;
pub mod failpoints;
mod macros;
pub mod migrator;
pub mod orchestrator;
pub mod stats;
pub mod task;
pub mod workers;
