//! auto-mend daemon -- feedback in, pull requests out.

use anyhow::Result;
use tracing::info;

use am_core::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    am_telemetry::logging::init_logging("am-daemon", "info");

    let config = Config::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        store_mode = ?config.store.mode,
        "auto-mend daemon starting"
    );

    am_daemon::run(config).await
}
