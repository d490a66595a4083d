use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::{sync::broadcast, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db::{models::validate_owner_id, Ledger, LedgerEvent, LocationSample},
    delivery::{Collector, DeliveryAgent, DrainReport},
    error::{PermissionScope, TrackerError},
    sensing::{loop_worker::read_fix, SampleSource, SamplingRequest, SensingController},
    settings::TrackerSettings,
};

use super::{CaptureOutcome, CapturePipeline, SessionHandle, TrackingState, TrackingStatus};

/// Surface consumed by the UI layer: session lifecycle, manual capture,
/// the context flag, and read access to the history.
#[derive(Clone)]
pub struct TrackingController {
    session: SessionHandle,
    ledger: Ledger,
    agent: DeliveryAgent,
    pipeline: CapturePipeline,
    source: Arc<dyn SampleSource>,
    sensing: Arc<Mutex<SensingController>>,
    /// Serializes start/stop so transitional states are never observed by
    /// a competing transition.
    lifecycle: Arc<Mutex<()>>,
    request: SamplingRequest,
    capture_timeout: Duration,
    drain_token: CancellationToken,
    drain_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TrackingController {
    /// Builds the controller, starts the drain timer, and resynchronizes with
    /// the host: if background sampling survived a process relaunch the
    /// session resumes as running.
    pub async fn new(
        settings: &TrackerSettings,
        ledger: Ledger,
        source: Arc<dyn SampleSource>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        let noise = settings.noise_constants()?;
        let session = SessionHandle::new();
        let agent = DeliveryAgent::new(
            ledger.clone(),
            collector,
            settings.pending_batch_size,
            settings.delivery_timeout(),
        );
        let pipeline = CapturePipeline::new(
            ledger.clone(),
            agent.clone(),
            session.clone(),
            noise,
            settings.storage_write_attempts,
        );

        let drain_token = CancellationToken::new();
        let drain_task = tokio::spawn(
            agent
                .clone()
                .run_drain_loop(settings.drain_interval(), drain_token.clone()),
        );

        let controller = Self {
            session,
            ledger,
            agent,
            pipeline,
            source,
            sensing: Arc::new(Mutex::new(SensingController::new())),
            lifecycle: Arc::new(Mutex::new(())),
            request: SamplingRequest {
                interval: settings.sampling_interval(),
                min_distance_m: settings.min_distance_m,
            },
            capture_timeout: settings.capture_timeout(),
            drain_token,
            drain_task: Arc::new(Mutex::new(Some(drain_task))),
        };

        controller
            .resync()
            .await
            .map_err(|err| anyhow!("failed to resynchronize tracking state: {err}"))?;
        Ok(controller)
    }

    async fn on_source<T, F>(&self, call: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&dyn SampleSource) -> T + Send + 'static,
        T: Send + 'static,
    {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || call(source.as_ref()))
            .await
            .map_err(|err| TrackerError::Source(anyhow!("location worker join failed: {err}")))
    }

    async fn resync(&self) -> Result<(), TrackerError> {
        let _lifecycle = self.lifecycle.lock().await;
        let registered = self.on_source(|source| source.is_registered()).await?;
        let status = self.session.status().await;

        match (registered, status) {
            (true, TrackingStatus::Stopped) => {
                warn!("Background sampling is still registered from a previous run; resuming");
                self.begin_running(false).await?;
            }
            (false, TrackingStatus::Running) => {
                warn!("Background sampling was deregistered by the host; stopping");
                self.halt_sensing().await;
                self.session.lock().await.end_session();
            }
            _ => {}
        }
        Ok(())
    }

    /// Fresh filter, new session id, optional registration, capture loop.
    /// Any failure leaves the session `Stopped`.
    async fn begin_running(&self, register: bool) -> Result<(), TrackerError> {
        if let Err(err) = self.launch(register).await {
            self.session.lock().await.end_session();
            return Err(err);
        }

        let session_id = Uuid::new_v4().to_string();
        info!("Tracking session {session_id} running");
        self.session
            .lock()
            .await
            .begin_session(session_id, Utc::now());
        Ok(())
    }

    async fn launch(&self, register: bool) -> Result<(), TrackerError> {
        self.pipeline.reset_filter();

        if register {
            let request = self.request;
            self.on_source(move |source| source.register(&request))
                .await?
                .map_err(TrackerError::Source)?;
        }

        self.sensing
            .lock()
            .await
            .start_sensing(
                Arc::clone(&self.source),
                self.pipeline.clone(),
                self.request,
                self.capture_timeout,
            )
            .map_err(TrackerError::Source)
    }

    async fn halt_sensing(&self) {
        let mut sensing = self.sensing.lock().await;
        if !sensing.is_running() {
            return;
        }
        if let Err(err) = sensing.stop_sensing().await {
            error!("Failed to stop sensing loop: {err:#}");
        }
    }

    async fn check_permissions(&self) -> Result<(), TrackerError> {
        let foreground = self
            .on_source(|source| source.request_foreground_permission())
            .await?;
        if !foreground.is_granted() {
            warn!("Foreground location permission denied");
            return Err(TrackerError::PermissionDenied(PermissionScope::Foreground));
        }

        let background = self
            .on_source(|source| source.request_background_permission())
            .await?;
        if !background.is_granted() {
            warn!("Background location permission denied");
            return Err(TrackerError::PermissionDenied(PermissionScope::Background));
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<TrackingState, TrackerError> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.session.lock().await;
            if state.status == TrackingStatus::Running {
                return Ok(state.clone());
            }
            state.status = TrackingStatus::Starting;
        }

        if let Err(err) = self.check_permissions().await {
            self.session.lock().await.end_session();
            return Err(err);
        }

        self.begin_running(true).await?;
        Ok(self.session.snapshot().await)
    }

    /// Stopping an already stopped session is a no-op.
    pub async fn stop(&self) -> Result<(), TrackerError> {
        let _lifecycle = self.lifecycle.lock().await;

        let registered = self.on_source(|source| source.is_registered()).await?;
        {
            let mut state = self.session.lock().await;
            if state.status == TrackingStatus::Stopped && !registered {
                return Ok(());
            }
            state.status = TrackingStatus::Stopping;
        }

        self.halt_sensing().await;

        let unregistered = if registered {
            self.on_source(|source| source.unregister())
                .await
                .and_then(|result| result.map_err(TrackerError::Source))
        } else {
            Ok(())
        };

        let session_id = {
            let mut state = self.session.lock().await;
            let session_id = state.session_id.take();
            state.end_session();
            session_id
        };
        info!(
            "Tracking session {} stopped",
            session_id.as_deref().unwrap_or("<none>")
        );

        unregistered
    }

    /// One capture outside the schedule; the distance gate does not apply.
    pub async fn capture_once(&self) -> Result<CaptureOutcome, TrackerError> {
        let fix = tokio::time::timeout(self.capture_timeout, read_fix(&self.source))
            .await
            .map_err(|_| {
                TrackerError::Source(anyhow!(
                    "location fix timed out after {}ms",
                    self.capture_timeout.as_millis()
                ))
            })?
            .map_err(TrackerError::Source)?;

        self.pipeline.process(fix).await
    }

    /// Applies to samples captured from now on.
    pub async fn set_context_flag(&self, value: bool) {
        self.session.set_context_flag(value).await;
    }

    pub async fn context_flag(&self) -> bool {
        self.session.capture_context().await.context_flag
    }

    /// Ids that cannot be stored are refused and the current id is kept.
    pub async fn set_owner_id(&self, owner_id: u64) -> Result<(), TrackerError> {
        validate_owner_id(owner_id)?;
        self.session.set_owner_id(owner_id).await;
        Ok(())
    }

    pub async fn owner_id(&self) -> u64 {
        self.session.capture_context().await.owner_id
    }

    /// Destructive; callers confirm with the user first.
    pub async fn clear_history(&self) -> Result<(), TrackerError> {
        self.ledger
            .clear_all()
            .await
            .map_err(TrackerError::StorageFault)?;
        info!("Location history cleared");
        Ok(())
    }

    /// The host's registration state wins over in-memory state.
    pub async fn is_active(&self) -> bool {
        match self.on_source(|source| source.is_registered()).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(err) => warn!("Could not query sampling registration: {err}"),
        }
        self.session.status().await == TrackingStatus::Running
    }

    pub async fn list_history(&self) -> Result<Vec<LocationSample>, TrackerError> {
        self.ledger
            .list_samples(None)
            .await
            .map_err(TrackerError::StorageFault)
    }

    pub async fn list_history_for(&self, owner_id: u64) -> Result<Vec<LocationSample>, TrackerError> {
        self.ledger
            .list_samples(Some(owner_id))
            .await
            .map_err(TrackerError::StorageFault)
    }

    pub async fn pending_count(&self) -> Result<u64, TrackerError> {
        self.agent.pending_count().await
    }

    pub async fn drain_now(&self) -> Result<DrainReport, TrackerError> {
        self.agent.drain_pending().await
    }

    pub async fn snapshot(&self) -> TrackingState {
        self.session.snapshot().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.ledger.subscribe()
    }

    /// Stops background work owned by this process and waits for deliveries
    /// already in flight to finish or queue. Host registration is left alone
    /// so sampling can resume after a relaunch.
    pub async fn shutdown(&self) {
        self.halt_sensing().await;
        self.agent.settle().await;
        self.drain_token.cancel();
        if let Some(handle) = self.drain_task.lock().await.take() {
            if let Err(err) = handle.await {
                error!("Drain loop task failed to join: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests;
