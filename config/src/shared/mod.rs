//! Shared configuration types for migration services.

mod base;
mod migrator;
mod orchestrator;

pub use base::ValidationError;
pub use migrator::MigratorConfig;
pub use orchestrator::OrchestratorConfig;
