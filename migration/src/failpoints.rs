//! Fail points used to inject failures into migration tasks during tests.

use fail::fail_point;

use crate::error::MigrationResult;

/// Fail point evaluated right before a task hands its descriptor to the migrator.
pub const MIGRATION_TASK_BEFORE_MIGRATE: &str = "migration_task.before_migrate";

/// Evaluates the fail point `name`, returning an injected error when it is configured to do so.
///
/// Compiles to a no-op unless the `failpoints` feature is enabled.
pub fn migration_fail_point(name: &str) -> MigrationResult<()> {
    fail_point!(name, |parameter| {
        let detail = match parameter {
            Some(parameter) => format!("The fail point '{name}' returned an error: {parameter}"),
            None => format!("The fail point '{name}' returned an error"),
        };

        crate::bail!(
            crate::error::ErrorKind::InjectedFailure,
            "An error occurred in a fail point",
            detail = detail
        );
    });

    Ok(())
}
