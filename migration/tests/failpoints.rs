#![cfg(feature = "failpoints")]

use config::shared::OrchestratorConfig;
use fail::FailScenario;
use migration::failpoints::MIGRATION_TASK_BEFORE_MIGRATE;
use migration::orchestrator::MigrationOrchestrator;
use migration::stats::MigrationStatsSnapshot;
use telemetry::init_test_tracing;

use crate::common::{TestDescriptor, TestMigrator};

mod common;

#[tokio::test]
async fn injected_failure_is_counted_and_does_not_block_completion() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(MIGRATION_TASK_BEFORE_MIGRATE, "1*return(injected)").unwrap();

    let migrator = TestMigrator::new();
    let orchestrator =
        MigrationOrchestrator::with_task_pool(&OrchestratorConfig::default(), migrator.clone())
            .unwrap();

    for id in 0..3 {
        orchestrator.submit(TestDescriptor::succeeding(id)).unwrap();
    }
    orchestrator.await_completion().await.unwrap();

    assert_eq!(
        orchestrator.stats(),
        MigrationStatsSnapshot {
            succeeded: 2,
            failed: 1
        }
    );
    assert_eq!(migrator.migrated().await.len(), 2);
    assert_eq!(orchestrator.pending(), 0);

    orchestrator.shutdown().await.unwrap();
    scenario.teardown();
}

#[tokio::test]
async fn panic_injected_before_migration_is_contained() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(MIGRATION_TASK_BEFORE_MIGRATE, "panic(injected)").unwrap();

    let migrator = TestMigrator::new();
    let orchestrator =
        MigrationOrchestrator::with_task_pool(&OrchestratorConfig::default(), migrator.clone())
            .unwrap();

    orchestrator.submit(TestDescriptor::succeeding(1)).unwrap();
    orchestrator.await_completion().await.unwrap();

    assert_eq!(
        orchestrator.stats(),
        MigrationStatsSnapshot {
            succeeded: 0,
            failed: 1
        }
    );
    assert_eq!(orchestrator.pending(), 0);
    assert!(migrator.migrated().await.is_empty());

    fail::remove(MIGRATION_TASK_BEFORE_MIGRATE);
    orchestrator.shutdown().await.unwrap();
    assert_eq!(migrator.close_calls(), 1);
    scenario.teardown();
}
