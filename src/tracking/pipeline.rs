//! Capture chain: raw fix → smoother → ledger → delivery.
//!
//! `process` returns once the sample is durable; delivery continues on a
//! background task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;

use crate::db::{Ledger, LocationSample, NewSample};
use crate::delivery::{DeliveryAgent, DeliveryTicket};
use crate::error::TrackerError;
use crate::filter::{CoordinateFilter, NoiseConstants};
use crate::sensing::RawFix;
use crate::{log_error, log_info, log_warn};

use super::state::SessionHandle;

const ENABLE_LOGS: bool = true;

const STORAGE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A stored sample plus its delivery, which is still running.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub sample: LocationSample,
    pub delivery: DeliveryTicket,
}

#[derive(Clone)]
pub struct CapturePipeline {
    ledger: Ledger,
    agent: DeliveryAgent,
    session: SessionHandle,
    filter: Arc<Mutex<CoordinateFilter>>,
    write_attempts: u32,
}

impl CapturePipeline {
    pub fn new(
        ledger: Ledger,
        agent: DeliveryAgent,
        session: SessionHandle,
        noise: NoiseConstants,
        write_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            agent,
            session,
            filter: Arc::new(Mutex::new(CoordinateFilter::new(noise))),
            write_attempts: write_attempts.max(2),
        }
    }

    /// Cold filter for a new session.
    pub fn reset_filter(&self) {
        self.filter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reset();
    }

    pub async fn process(&self, fix: RawFix) -> Result<CaptureOutcome, TrackerError> {
        // Garbage must not reach the smoother, it would skew every later sample.
        fix.validate()?;
        let timestamp = fix.captured_at()?;
        let context = self.session.capture_context().await;

        let (latitude, longitude) = self
            .filter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .smooth(fix.latitude, fix.longitude);

        let new_sample = NewSample {
            owner_id: context.owner_id,
            latitude,
            longitude,
            timestamp,
            context_flag: context.context_flag,
        };
        new_sample.validate()?;

        let id = self.persist(&new_sample).await?;
        let sample = new_sample.into_stored(id);
        log_info!(
            "sample {} stored ({:.6}, {:.6}) flag={}",
            sample.id,
            sample.latitude,
            sample.longitude,
            sample.context_flag
        );

        let delivery = self.agent.dispatch(sample.clone());
        Ok(CaptureOutcome { sample, delivery })
    }

    async fn persist(&self, sample: &NewSample) -> Result<i64, TrackerError> {
        let mut last_err = None;
        for attempt in 1..=self.write_attempts {
            match self.ledger.append(sample).await {
                Ok(id) => return Ok(id),
                Err(err) => {
                    log_warn!(
                        "append attempt {attempt}/{} failed: {err:#}",
                        self.write_attempts
                    );
                    last_err = Some(err);
                    if attempt < self.write_attempts {
                        tokio::time::sleep(STORAGE_RETRY_DELAY).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("no append attempt was made"));
        log_error!(
            "dropping sample captured at {}: {err:#}",
            sample.timestamp.to_rfc3339()
        );
        Err(TrackerError::StorageFault(err))
    }
}
