use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::tracking::CapturePipeline;

use super::geo::haversine_m;
use super::source::{RawFix, SampleSource, SamplingRequest};

// Set to false to silence per-tick logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Reads one fix from the platform on the blocking pool.
pub(crate) async fn read_fix(source: &Arc<dyn SampleSource>) -> Result<RawFix> {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || source.current_fix())
        .await
        .context("location worker join failed")?
}

fn moved_enough(last: Option<&RawFix>, fix: &RawFix, min_distance_m: f64) -> bool {
    let Some(last) = last else {
        return true;
    };
    if min_distance_m <= 0.0 {
        return true;
    }
    let distance = haversine_m(last.latitude, last.longitude, fix.latitude, fix.longitude);
    // NaN from a garbage fix falls through to validation in the pipeline.
    distance.is_nan() || distance >= min_distance_m
}

pub async fn sensing_loop(
    source: Arc<dyn SampleSource>,
    pipeline: CapturePipeline,
    request: SamplingRequest,
    capture_timeout: Duration,
    cancel_token: CancellationToken,
) {
    // The first fix arrives one interval after registration.
    let mut ticker = tokio::time::interval_at(Instant::now() + request.interval, request.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_accepted: Option<RawFix> = None;

    loop {
        tokio::select! {
            // A pending stop wins over a tick that is already due.
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sensing loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                match tokio::time::timeout(capture_timeout, read_fix(&source)).await {
                    Ok(Ok(fix)) => {
                        if moved_enough(last_accepted.as_ref(), &fix, request.min_distance_m) {
                            match pipeline.process(fix).await {
                                Ok(outcome) => {
                                    last_accepted = Some(fix);
                                    // Delivery finishes on its own task and logs its result.
                                    log_debug!("tick stored sample {}", outcome.sample.id);
                                }
                                Err(err) => log_error!("capture failed: {err}"),
                            }
                        } else {
                            log_debug!(
                                "fix within {} m of the last sample, skipping",
                                request.min_distance_m
                            );
                        }
                    }
                    Ok(Err(err)) => log_warn!("location fix unavailable: {err:#}"),
                    Err(_) => log_warn!(
                        "location fix timeout (> {}ms)",
                        capture_timeout.as_millis()
                    ),
                }
            }
        }
    }
}
