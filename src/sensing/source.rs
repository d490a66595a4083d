//! The platform positioning capability, abstracted.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{models::validate_coordinates, SampleValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

/// A raw reading as reported by the platform, before smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since the Unix epoch; `None` when the platform omitted it.
    pub timestamp_ms: Option<i64>,
    pub accuracy_m: Option<f64>,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms: None,
            accuracy_m: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp_ms = Some(timestamp.timestamp_millis());
        self
    }

    pub fn validate(&self) -> Result<(), SampleValidationError> {
        validate_coordinates(self.latitude, self.longitude)?;
        self.captured_at().map(|_| ())
    }

    /// Capture time of the reading, falling back to now when the platform
    /// did not stamp it.
    pub fn captured_at(&self) -> Result<DateTime<Utc>, SampleValidationError> {
        match self.timestamp_ms {
            Some(ms) => {
                DateTime::from_timestamp_millis(ms).ok_or(SampleValidationError::Timestamp(ms))
            }
            None => Ok(Utc::now()),
        }
    }
}

/// Cadence requested when registering for background updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRequest {
    pub interval: Duration,
    pub min_distance_m: f64,
}

/// Host positioning service. Calls may block on platform I/O; callers run
/// them on the blocking pool.
pub trait SampleSource: Send + Sync + 'static {
    fn request_foreground_permission(&self) -> PermissionStatus;

    fn request_background_permission(&self) -> PermissionStatus;

    fn current_fix(&self) -> Result<RawFix>;

    /// Whether background sampling is registered with the host. This can
    /// outlive the process, so it is the source of truth after a relaunch.
    fn is_registered(&self) -> bool;

    fn register(&self, request: &SamplingRequest) -> Result<()>;

    fn unregister(&self) -> Result<()>;
}
