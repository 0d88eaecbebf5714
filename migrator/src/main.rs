//! Resource migration service binary.
//!
//! Loads the configuration, initializes tracing and copies every file of the configured source
//! directory into the target directory, recording each copy in a manifest.

use crate::config::load_migrator_config;
use crate::core::start_migration;

use ::config::shared::MigratorConfig;
use telemetry::init_tracing;
use tracing::{error, info};

mod config;
mod core;
mod fs;

/// Entry point for the migrator.
///
/// Loads configuration and tracing before the async runtime starts.
fn main() -> anyhow::Result<()> {
    let migrator_config = load_migrator_config()?;

    init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(migrator_config))?;

    Ok(())
}

async fn async_main(migrator_config: MigratorConfig) -> anyhow::Result<()> {
    if let Err(err) = start_migration(migrator_config).await {
        error!(error = %err, "migrator failed");
        return Err(err);
    }

    info!("migrator completed successfully");

    Ok(())
}
