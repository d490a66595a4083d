pub mod db;
pub mod delivery;
pub mod error;
pub mod filter;
pub mod sensing;
pub mod settings;
pub mod tracking;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use db::{Ledger, LedgerEvent};
use delivery::HttpCollector;
use sensing::SimulatedSource;
use settings::TrackerSettings;
use tracking::TrackingController;

const DEFAULT_SETTINGS_FILE: &str = "routekeeper.json";

/// Starting point of the simulated walk when no platform source is wired in.
const HOME_LATITUDE: f64 = 10.0261;
const HOME_LONGITUDE: f64 = 76.3125;

/// Headless host: tracks until Ctrl-C, then stops cleanly. The optional first
/// argument names the settings file.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("RouteKeeper starting up...");

    let settings_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = TrackerSettings::load(Some(&settings_path))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(settings))
}

async fn serve(settings: TrackerSettings) -> Result<()> {
    let ledger = Ledger::open(&settings.db_path)?;
    let collector = Arc::new(HttpCollector::new(
        &settings.collector_url,
        settings.delivery_timeout(),
    )?);
    info!(
        "History in {}, delivering to {}",
        ledger.path().display(),
        collector.endpoint()
    );
    let source = Arc::new(SimulatedSource::random_walk(HOME_LATITUDE, HOME_LONGITUDE));

    let controller = TrackingController::new(&settings, ledger, source, collector).await?;
    let view = tokio::spawn(log_ledger_events(controller.clone()));

    if let Err(err) = controller.start().await {
        if let Some(alert) = err.user_alert() {
            warn!("{alert}");
        }
        controller.shutdown().await;
        view.abort();
        return Err(err.into());
    }
    info!(
        "Tracking; {} samples in history, {} pending delivery",
        controller.list_history().await?.len(),
        controller.pending_count().await?
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, stopping");

    let stopped = controller.stop().await;
    controller.shutdown().await;
    view.abort();
    stopped?;
    Ok(())
}

/// Stand-in for a map or list view: follows ledger changes as they happen.
async fn log_ledger_events(controller: TrackingController) {
    let mut events = controller.subscribe();
    loop {
        match events.recv().await {
            Ok(LedgerEvent::SampleAppended { id }) => info!("history: sample {id} appended"),
            Ok(LedgerEvent::PendingEnqueued { id }) => info!("pending: delivery {id} queued"),
            Ok(LedgerEvent::PendingRemoved { id }) => info!("pending: delivery {id} sent"),
            Ok(LedgerEvent::Cleared) => info!("history cleared"),
            Err(RecvError::Lagged(skipped)) => warn!("view fell behind by {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
