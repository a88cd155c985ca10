//! Assembly: config → store → breaker → model client → orchestrator → HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use am_agents::browser::HeadlessChrome;
use am_agents::publish::RecordedPublisher;
use am_agents::stages::tester::QualityGate;
use am_agents::Orchestrator;
use am_bridge::http_api::{build_router, ApiState};
use am_core::config::Config;
use am_core::workspace::Workspace;
use am_harness::{BreakerConfig, ShutdownSignal, TokenBreaker};
use am_intelligence::{AnthropicProvider, ModelClient};
use am_store::Store;

/// Run the daemon until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let store = Store::open(&config.store).context("opening store")?;
    let flush_loop = store.spawn_flush_loop();

    let shutdown = ShutdownSignal::new();
    let breaker = TokenBreaker::new(
        BreakerConfig::from(&config.breaker),
        Arc::new(store.clone()),
    );
    let housekeeping = breaker.spawn_housekeeping(Duration::from_secs(1));

    if config.model.api_key.is_empty() {
        warn!("MODEL_API_KEY is not set; model calls will fail until configured");
    }
    let provider = Arc::new(AnthropicProvider::new(config.model.api_key.clone()));
    let model = ModelClient::new(provider, breaker.clone(), store.clone(), &config.model.model)
        .with_timeout(Duration::from_millis(config.model.timeout_ms));

    let workspace = Arc::new(Workspace::new(config.workspace.clone()));
    let runner = Arc::new(HeadlessChrome::discover(
        config.tester.chrome_path.as_deref(),
        &config.tester.app_url,
    ));
    if let Err(reason) = am_agents::browser::BrowserRunner::availability(runner.as_ref()) {
        warn!(reason = %reason, "test harness degraded");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        breaker.clone(),
        model,
        workspace,
        runner,
        Arc::new(RecordedPublisher::default()),
        QualityGate {
            min_cases: config.tester.min_cases,
            min_score: None,
        },
        shutdown.clone(),
    ));

    let state = Arc::new(ApiState::new(store.clone(), breaker, orchestrator));
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "auto-mend daemon listening");

    let signal_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            // In-flight pipelines observe this at their next suspension point
            // and unwind as aborted.
            signal_shutdown.trigger();
        })
        .await
        .context("serving HTTP")?;

    info!("http server stopped, draining");
    // Give in-flight pipelines a bounded window to unwind and release their
    // breaker reservations before the process exits.
    tokio::time::sleep(Duration::from_secs(2)).await;

    housekeeping.abort();
    flush_loop.abort();
    store.flush().context("final store flush")?;
    info!("auto-mend daemon stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
