//! Tracing setup shared by the migration binaries and tests.

use std::sync::Once;

use config::environment::Environment;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable that enables log output in tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Filter applied when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    /// The runtime environment could not be determined.
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] std::io::Error),
    /// A global subscriber was already installed.
    #[error("failed to install the tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Installs the global tracing subscriber for `app_name`.
///
/// Logs are filtered through `RUST_LOG` (defaulting to `info`) and rendered as JSON in
/// production and as human readable text otherwise.
pub fn init_tracing(app_name: &str) -> Result<(), TracingError> {
    let environment = Environment::load()?;
    init_tracing_for(app_name, environment)
}

/// Installs the global tracing subscriber for an explicit [`Environment`].
pub fn init_tracing_for(app_name: &str, environment: Environment) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if environment.is_prod() {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }

    tracing::info!(app = app_name, %environment, "tracing initialized");

    Ok(())
}

/// Initializes tracing for tests when `ENABLE_TRACING` is set.
///
/// Safe to call from every test; the subscriber is installed at most once per process and
/// writes through the test harness capture.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    if std::env::var(ENABLE_TRACING_ENV_NAME).is_err() {
        return;
    }

    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
