use config::shared::MigratorConfig;
use migration::concurrency::interrupt::InterruptTx;
use migration::error::MigrationResult;
use migration::orchestrator::MigrationOrchestrator;
use std::path::Path;
use tracing::{error, info, warn};

use crate::fs::{FileCopyMigrator, list_resources};

/// Migrates every file of the source directory into the target directory.
///
/// Files are copied concurrently through a [`MigrationOrchestrator`]. Failed files are logged
/// and counted without stopping the others. The orchestrator is always shut down before
/// returning, which closes the manifest.
pub async fn start_migration(migrator_config: MigratorConfig) -> anyhow::Result<()> {
    info!("starting migration");

    log_config(&migrator_config);
    migrator_config.validate()?;

    let manifest_path = migrator_config.manifest_path();
    let migrator = FileCopyMigrator::open(
        migrator_config.source_dir.clone(),
        migrator_config.target_dir.clone(),
        &manifest_path,
    )
    .await?;
    let orchestrator =
        MigrationOrchestrator::with_task_pool(&migrator_config.orchestrator, migrator)?;

    let signal_handle = tokio::spawn(forward_signals(orchestrator.interrupt_tx()));

    let completion = match submit_resources(&orchestrator, &migrator_config.source_dir).await {
        Ok(submitted) => {
            info!(submitted, "submitted all resources, waiting for completion");
            orchestrator.await_completion().await
        }
        Err(err) => Err(err),
    };

    if let Err(err) = &completion {
        warn!(error = %err, "migration did not complete, shutting down");
    }

    let shutdown = orchestrator.shutdown().await;
    signal_handle.abort();

    let stats = orchestrator.stats();
    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        "migration finished"
    );

    completion?;
    shutdown?;

    if stats.failed > 0 {
        error!(failed = stats.failed, "some resources failed to migrate");
        anyhow::bail!("{} resources failed to migrate", stats.failed);
    }

    Ok(())
}

/// Submits every file below `source_dir`, returning how many were submitted.
async fn submit_resources(
    orchestrator: &MigrationOrchestrator<FileCopyMigrator>,
    source_dir: &Path,
) -> MigrationResult<usize> {
    let resources = list_resources(source_dir).await?;
    let submitted = resources.len();

    for resource in resources {
        orchestrator.submit(resource)?;
    }

    Ok(submitted)
}

/// Turns every SIGINT or SIGTERM into an orchestrator interruption.
///
/// The first signal stops waiting for completion and starts a graceful shutdown, a second one
/// interrupts that shutdown and cancels the remaining copies.
async fn forward_signals(interrupt_tx: InterruptTx) {
    #[cfg(unix)]
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(err) => {
                warn!(error = %err, "failed to register sigterm handler");
                None
            }
        };

    loop {
        #[cfg(unix)]
        let terminate = async {
            match sigterm.as_mut() {
                Some(sigterm) => {
                    sigterm.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(error = %err, "failed to listen for ctrl+c, signals are no longer forwarded");
                    return;
                }
                info!("sigint (ctrl+c) received, interrupting migration");
            }
            _ = terminate => {
                info!("sigterm received, interrupting migration");
            }
        }

        interrupt_tx.interrupt();
    }
}

fn log_config(config: &MigratorConfig) {
    info!(
        source_dir = %config.source_dir.display(),
        target_dir = %config.target_dir.display(),
        manifest = %config.manifest_path().display(),
        max_concurrent_tasks = config.orchestrator.max_concurrent_tasks,
        shutdown_grace_period_ms = config.orchestrator.shutdown_grace_period_ms,
        "migrator configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::shared::OrchestratorConfig;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn migrates_a_whole_directory_tree() {
        let root = std::env::temp_dir().join(format!("migrator-core-{}", uuid::Uuid::new_v4()));
        let source_dir = root.join("source");
        let target_dir = root.join("target");
        std::fs::create_dir_all(source_dir.join("deep/er")).unwrap();
        for (index, path) in ["one.txt", "deep/two.txt", "deep/er/three.txt"]
            .iter()
            .enumerate()
        {
            std::fs::write(source_dir.join(path), vec![b'x'; index + 1]).unwrap();
        }

        let migrator_config = MigratorConfig {
            source_dir: source_dir.clone(),
            target_dir: target_dir.clone(),
            manifest_path: None,
            orchestrator: OrchestratorConfig {
                max_concurrent_tasks: 2,
                shutdown_grace_period_ms: 1_000,
            },
        };
        start_migration(migrator_config).await.unwrap();

        assert_eq!(
            std::fs::read(target_dir.join("deep/er/three.txt")).unwrap(),
            b"xxx"
        );
        let manifest = std::fs::read_to_string(target_dir.join("manifest.jsonl")).unwrap();
        assert_eq!(manifest.lines().count(), 3);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn target_inside_source_is_refused_before_touching_the_filesystem() {
        let root = std::env::temp_dir().join(format!("migrator-core-{}", uuid::Uuid::new_v4()));
        let source_dir = root.join("source");
        let target_dir = source_dir.join("out");
        std::fs::create_dir_all(&source_dir).unwrap();
        std::fs::write(source_dir.join("one.txt"), b"x").unwrap();

        let migrator_config = MigratorConfig {
            source_dir,
            target_dir: target_dir.clone(),
            manifest_path: None,
            orchestrator: OrchestratorConfig::default(),
        };
        assert!(start_migration(migrator_config).await.is_err());
        assert!(!target_dir.exists());

        std::fs::remove_dir_all(&root).unwrap();
    }
}
