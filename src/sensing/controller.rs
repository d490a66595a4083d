use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::tracking::CapturePipeline;

use super::loop_worker::sensing_loop;
use super::source::{SampleSource, SamplingRequest};

/// Owns the periodic capture task for one tracking session.
pub struct SensingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SensingController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start_sensing(
        &mut self,
        source: Arc<dyn SampleSource>,
        pipeline: CapturePipeline,
        request: SamplingRequest,
        capture_timeout: Duration,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("sensing already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sensing_loop(
            source,
            pipeline,
            request,
            capture_timeout,
            cancel_token.clone(),
        ));

        info!(
            "Sensing started (interval {}ms, min distance {} m)",
            request.interval.as_millis(),
            request.min_distance_m
        );
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Cancels future ticks and waits for a capture already in flight to
    /// finish writing.
    pub async fn stop_sensing(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sensing loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for SensingController {
    fn default() -> Self {
        Self::new()
    }
}
