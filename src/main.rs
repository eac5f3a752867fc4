//! feedwatch: binary entrypoint
//! Boots the Axum HTTP server and the background poll loop.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;

use feedwatch::metrics::Metrics;
use feedwatch::scheduler::ready_signal;
use feedwatch::{create_router, init_tracing, AppConfig, Service};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Recorder first: anything described before it is lost.
    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics disabled");
            None
        }
    };

    let config = AppConfig::load_default().context("loading feedwatch config")?;
    let service = Service::from_config(config)
        .await
        .context("wiring feedwatch")?;

    // No host connection to wait for: ready from the start.
    let (_ready_tx, ready_rx) = ready_signal(true);
    let mut poller = service.poll_controller(ready_rx);
    poller.start();

    let router = create_router(service.app_state(poller), metrics.as_ref());
    Ok(router.into())
}
