use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::db::SampleValidationError;
use crate::delivery::DeliveryError;

/// Which platform permission a start attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionScope {
    Foreground,
    Background,
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionScope::Foreground => f.write_str("foreground"),
            PermissionScope::Background => f.write_str("background"),
        }
    }
}

/// Failures surfaced by the tracking surface to the UI layer.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{0} location permission denied")]
    PermissionDenied(PermissionScope),

    #[error("storage fault: {0:#}")]
    StorageFault(anyhow::Error),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("malformed sample: {0}")]
    MalformedSample(#[from] SampleValidationError),

    #[error("location source failed: {0:#}")]
    Source(anyhow::Error),
}

impl TrackerError {
    /// Everything except a storage fault can be retried by the user or is
    /// retried by the pending queue.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TrackerError::StorageFault(_))
    }

    /// Alert text for the conditions the user must see. Delivery failures are
    /// absorbed by the pending queue and stay silent.
    pub fn user_alert(&self) -> Option<String> {
        match self {
            TrackerError::PermissionDenied(PermissionScope::Foreground) => {
                Some("Foreground location access is required to track your route.".into())
            }
            TrackerError::PermissionDenied(PermissionScope::Background) => Some(
                "Allow location access all the time so tracking continues in the background."
                    .into(),
            ),
            TrackerError::StorageFault(err) => {
                Some(format!("Could not save location history: {err:#}"))
            }
            TrackerError::Source(err) => Some(format!("Location unavailable: {err:#}")),
            TrackerError::Delivery(_) | TrackerError::MalformedSample(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_failures_are_silent() {
        let err = TrackerError::Delivery(DeliveryError::Status(503));
        assert!(err.user_alert().is_none());
        assert!(err.is_recoverable());
    }

    #[test]
    fn permission_and_storage_faults_alert() {
        let denied = TrackerError::PermissionDenied(PermissionScope::Background);
        assert!(denied.user_alert().is_some());
        assert!(denied.is_recoverable());
        assert_eq!(denied.to_string(), "background location permission denied");

        let fault = TrackerError::StorageFault(anyhow::anyhow!("disk full"));
        assert!(fault.user_alert().unwrap().contains("disk full"));
        assert!(!fault.is_recoverable());
    }
}
