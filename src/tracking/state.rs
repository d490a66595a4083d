use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackingStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub status: TrackingStatus,
    /// 0 when the user has not identified themselves.
    pub owner_id: u64,
    pub context_flag: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TrackingState {
    pub fn begin_session(&mut self, session_id: String, started_at: DateTime<Utc>) {
        self.status = TrackingStatus::Running;
        self.session_id = Some(session_id);
        self.started_at = Some(started_at);
    }

    /// Owner and flag survive a stop; they are user choices, not session data.
    pub fn end_session(&mut self) {
        self.status = TrackingStatus::Stopped;
        self.session_id = None;
        self.started_at = None;
    }
}

/// Identity and tag stamped onto a sample at the instant it is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureContext {
    pub owner_id: u64,
    pub context_flag: bool,
}

/// Shared handle to the session state. The controller mutates it; the
/// capture path reads it at capture time.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<TrackingState>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, TrackingState> {
        self.inner.lock().await
    }

    pub async fn snapshot(&self) -> TrackingState {
        self.inner.lock().await.clone()
    }

    pub async fn status(&self) -> TrackingStatus {
        self.inner.lock().await.status
    }

    pub async fn capture_context(&self) -> CaptureContext {
        let state = self.inner.lock().await;
        CaptureContext {
            owner_id: state.owner_id,
            context_flag: state.context_flag,
        }
    }

    pub async fn set_context_flag(&self, value: bool) {
        self.inner.lock().await.context_flag = value;
    }

    pub async fn set_owner_id(&self, owner_id: u64) {
        self.inner.lock().await.owner_id = owner_id;
    }
}
