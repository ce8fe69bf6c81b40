//! # beaconlog-server
//!
//! Daemon for the beaconlog beacon logger.
//!
//! This binary provides:
//! - The scan session controller behind a start/stop HTTP control
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, against the mock radio
//! cargo run --package beaconlog-server --no-default-features --features mock-bluetooth
//!
//! # Production
//! BEACONLOG_ENV=production ./beaconlog-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beaconlog_core::{Clock, Config, NetworkClock, SystemClock, UiHandle};
use beaconlog_server::state::{AppState, Platform};
use beaconlog_server::ui::SharedView;
use beaconlog_server::{api, logging, ui};
use tokio::net::TcpListener;
use tracing::{info, warn};

const UI_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
async fn platform(config: &Config) -> anyhow::Result<Platform> {
    let bluez = Arc::new(
        beaconlog_core::BluezPlatform::new()
            .await
            .context("Unable to open the Bluetooth adapter")?,
    );
    let ranging = Arc::new(bluez.ranging(&config.scan));
    Ok(Platform {
        host: bluez.clone(),
        status: bluez,
        ranging,
    })
}

#[cfg(not(all(feature = "bluetooth", not(feature = "mock-bluetooth"))))]
#[allow(clippy::unused_async)]
async fn platform(_config: &Config) -> anyhow::Result<Platform> {
    warn!("Running against the mock Bluetooth platform");
    let mock = Arc::new(beaconlog_core::MockPlatform::ready());
    Ok(Platform {
        host: mock.clone(),
        status: mock,
        ranging: Arc::new(beaconlog_core::MockRanging::new()),
    })
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    // In-flight requests are drained before serve returns; none may be
    // parked on a prompt nobody will answer.
    state.controller.cancel_pending();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!("Starting beaconlog-server");

    let config = Config::load().context("Unable to load configuration")?;
    info!(
        database = %config.database_path().display(),
        persist = config.session.persist,
        "Configuration loaded"
    );

    let (ui_handle, ui_rx) = UiHandle::channel();
    let view = SharedView::default();
    let ui_task = ui::spawn(ui_rx, Arc::clone(&view));

    let network_clock = config.clock.enabled.then(|| {
        let clock = Arc::new(NetworkClock::new(&config.clock));
        clock.spawn_sync(ui_handle.clone());
        clock
    });
    let clock: Arc<dyn Clock> = match &network_clock {
        Some(c) => c.clone(),
        None => Arc::new(SystemClock),
    };

    let platform = platform(&config).await?;
    let bind = config.server.bind.clone();
    let state = Arc::new(AppState::new(
        config,
        platform,
        clock,
        network_clock,
        ui_handle,
        view,
    ));

    // Startup preflight; prompts are raised now rather than on first start.
    let report = state.controller.preflight().await;
    if !report.all_passed() {
        warn!(failed = ?report.failed_steps(), "Preflight incomplete at startup");
    }

    let app = api::create_router(Arc::clone(&state));
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Unable to bind {bind}"))?;
    info!("Listening on {}", bind);
    info!("Swagger UI at http://{}/docs", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    if let Some(report) = state.controller.shutdown().await {
        info!(rotation = ?report.rotation, "Session stopped on shutdown");
    }
    drop(state);
    // Remaining notices are flushed once the last handle goes away.
    match tokio::time::timeout(UI_DRAIN_TIMEOUT, ui_task).await {
        Ok(Err(e)) => warn!(error = %e, "UI task ended abnormally"),
        Err(_) => warn!("UI task still running at exit"),
        Ok(Ok(())) => {}
    }

    info!("beaconlog-server stopped");
    Ok(())
}
