//! Store-and-forward relay to the collector.
//!
//! A freshly captured sample gets one immediate attempt on a background task,
//! so the capture path never waits on the network. If that attempt fails the
//! payload goes into the durable pending queue, which a timer drains oldest
//! first. A drain halts at the first failure so later samples never overtake
//! earlier ones at the collector.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::db::{Ledger, LocationSample};
use crate::error::TrackerError;
use crate::{log_debug, log_error, log_info, log_warn};

use super::{Collector, CollectorPayload, DeliveryError};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryOutcome {
    Delivered,
    /// Durably held in the pending queue under this id.
    Queued { pending_id: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Another drain was already running; nothing was attempted.
    pub skipped: bool,
    pub attempted: usize,
    pub delivered: usize,
    /// Rows whose payload could not be decoded and were discarded.
    pub discarded: usize,
    /// The row the batch stopped at, if a delivery failed.
    pub halted_at: Option<i64>,
}

/// Handle to a delivery running in the background. Dropping it detaches the
/// delivery; it still completes or queues.
#[derive(Debug)]
pub struct DeliveryTicket {
    handle: JoinHandle<Result<DeliveryOutcome, TrackerError>>,
}

impl DeliveryTicket {
    pub async fn outcome(self) -> Result<DeliveryOutcome, TrackerError> {
        self.handle
            .await
            .map_err(|err| TrackerError::Delivery(DeliveryError::Worker(err.to_string())))?
    }
}

/// Clears the drain-in-progress flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct DeliveryAgent {
    ledger: Ledger,
    collector: Arc<dyn Collector>,
    batch_size: usize,
    timeout: Duration,
    draining: Arc<AtomicBool>,
    in_flight: TaskTracker,
}

impl DeliveryAgent {
    pub fn new(
        ledger: Ledger,
        collector: Arc<dyn Collector>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            collector,
            batch_size: batch_size.max(1),
            timeout,
            draining: Arc::new(AtomicBool::new(false)),
            in_flight: TaskTracker::new(),
        }
    }

    /// One bounded delivery attempt on the blocking pool.
    async fn attempt(&self, payload: CollectorPayload) -> Result<(), DeliveryError> {
        let collector = Arc::clone(&self.collector);
        let call = tokio::task::spawn_blocking(move || collector.deliver(&payload));

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DeliveryError::Worker(join_err.to_string())),
            Err(_) => Err(DeliveryError::Timeout(self.timeout)),
        }
    }

    /// Starts delivery of a stored sample and returns at once.
    pub fn dispatch(&self, sample: LocationSample) -> DeliveryTicket {
        let agent = self.clone();
        let handle = self
            .in_flight
            .spawn(async move { agent.send_immediate(&sample).await });
        DeliveryTicket { handle }
    }

    /// Delivers a sample that is already stored in the ledger, queueing it
    /// when the collector cannot be reached. Waits for this one attempt only;
    /// the backlog drain it may trigger runs in the background.
    pub async fn send_immediate(
        &self,
        sample: &LocationSample,
    ) -> Result<DeliveryOutcome, TrackerError> {
        let payload = CollectorPayload::from(sample);

        match self.attempt(payload.clone()).await {
            Ok(()) => {
                log_info!("sample {} delivered", sample.id);
                // The collector is reachable again; push any backlog behind it.
                self.spawn_drain();
                Ok(DeliveryOutcome::Delivered)
            }
            Err(err) => {
                log_warn!("sample {} delivery failed, queueing: {err}", sample.id);
                let body = payload.to_json().map_err(TrackerError::StorageFault)?;
                let pending_id = self
                    .ledger
                    .enqueue_pending(&body, sample.timestamp)
                    .await
                    .map_err(|err| {
                        log_error!(
                            "sample {} is in history but could not be queued: {err:#}",
                            sample.id
                        );
                        TrackerError::StorageFault(err)
                    })?;
                Ok(DeliveryOutcome::Queued { pending_id })
            }
        }
    }

    fn spawn_drain(&self) {
        let agent = self.clone();
        self.in_flight.spawn(async move {
            if let Err(err) = agent.drain_pending().await {
                log_warn!("opportunistic drain failed: {err}");
            }
        });
    }

    /// Waits until every background delivery and drain started so far has
    /// finished.
    pub async fn settle(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    /// Attempts one batch of the pending queue in id order, stopping at the
    /// first failed delivery.
    pub async fn drain_pending(&self) -> Result<DrainReport, TrackerError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log_debug!("drain already in progress, skipping");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        }
        let _guard = DrainGuard(&self.draining);

        let batch = self
            .ledger
            .list_pending(self.batch_size)
            .await
            .map_err(TrackerError::StorageFault)?;

        let mut report = DrainReport::default();
        for row in batch {
            let payload = match CollectorPayload::from_json(&row.payload) {
                Ok(payload) => payload,
                Err(err) => {
                    log_error!("discarding undeliverable pending row {}: {err:#}", row.id);
                    self.ledger
                        .remove_pending(row.id)
                        .await
                        .map_err(TrackerError::StorageFault)?;
                    report.discarded += 1;
                    continue;
                }
            };

            report.attempted += 1;
            match self.attempt(payload).await {
                Ok(()) => {
                    self.ledger
                        .remove_pending(row.id)
                        .await
                        .map_err(TrackerError::StorageFault)?;
                    report.delivered += 1;
                    log_debug!("pending row {} delivered", row.id);
                }
                Err(err) => {
                    log_info!("drain halted at pending row {}: {err}", row.id);
                    report.halted_at = Some(row.id);
                    break;
                }
            }
        }

        if report.delivered > 0 {
            log_info!("drained {} pending deliveries", report.delivered);
        }
        Ok(report)
    }

    pub async fn pending_count(&self) -> Result<u64, TrackerError> {
        self.ledger
            .count_pending()
            .await
            .map_err(TrackerError::StorageFault)
    }

    /// Drains on a fixed period until cancelled, starting one period from
    /// now. A drain that has started runs to completion before cancellation
    /// is observed.
    pub async fn run_drain_loop(self, period: Duration, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.drain_pending().await {
                        log_error!("scheduled drain failed: {err}");
                    }
                }
                _ = cancel_token.cancelled() => {
                    log_info!("drain loop shutting down");
                    break;
                }
            }
        }
    }
}
