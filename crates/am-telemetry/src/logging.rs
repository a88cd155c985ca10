use tracing_subscriber::{fmt, EnvFilter};

/// Initialize human-readable logging.
///
/// Honors `RUST_LOG` when set, otherwise falls back to `default_level`
/// (e.g. "info", "am_harness=debug,info"). Safe to call more than once --
/// later calls are no-ops, which keeps test binaries quiet.
pub fn init_logging(service_name: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised");
}

/// Initialize JSON logging for log shippers.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}
