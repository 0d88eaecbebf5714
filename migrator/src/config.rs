use anyhow::Context;
use config::load_config;
use config::shared::MigratorConfig;

/// Loads and validates the migrator configuration.
///
/// Uses the layered loading from [`config::load_config`] and validates the resulting
/// [`MigratorConfig`] before returning it.
pub fn load_migrator_config() -> anyhow::Result<MigratorConfig> {
    let config = load_config::<MigratorConfig>().context("failed to load migrator configuration")?;
    config
        .validate()
        .context("invalid migrator configuration")?;

    Ok(config)
}
