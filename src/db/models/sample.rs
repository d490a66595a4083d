//! Location sample data model.
//!
//! One smoothed position fix captured during a tracking session. Rows are
//! immutable once stored and only disappear through `Ledger::clear_all`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_LATITUDE: f64 = 90.0;
pub const MAX_LONGITUDE: f64 = 180.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleValidationError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("timestamp {0} cannot be represented")]
    Timestamp(i64),
    #[error("owner id {0} exceeds the storable range")]
    OwnerId(u64),
}

/// A stored sample as read back from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub id: i64,
    pub owner_id: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time, not insert time.
    pub timestamp: DateTime<Utc>,
    pub context_flag: bool,
}

/// A sample that has been captured and smoothed but not yet assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSample {
    pub owner_id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub context_flag: bool,
}

impl NewSample {
    pub fn validate(&self) -> Result<(), SampleValidationError> {
        validate_owner_id(self.owner_id)?;
        validate_coordinates(self.latitude, self.longitude)
    }

    pub fn into_stored(self, id: i64) -> LocationSample {
        LocationSample {
            id,
            owner_id: self.owner_id,
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: self.timestamp,
            context_flag: self.context_flag,
        }
    }
}

/// Owner ids are stored as SQLite integers, which are signed.
pub fn validate_owner_id(owner_id: u64) -> Result<(), SampleValidationError> {
    if i64::try_from(owner_id).is_err() {
        return Err(SampleValidationError::OwnerId(owner_id));
    }
    Ok(())
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), SampleValidationError> {
    if !latitude.is_finite() || latitude.abs() > MAX_LATITUDE {
        return Err(SampleValidationError::Latitude(latitude));
    }
    if !longitude.is_finite() || longitude.abs() > MAX_LONGITUDE {
        return Err(SampleValidationError::Longitude(longitude));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(owner_id: u64) -> NewSample {
        NewSample {
            owner_id,
            latitude: 10.0,
            longitude: 76.0,
            timestamp: Utc::now(),
            context_flag: false,
        }
    }

    #[test]
    fn owner_id_must_fit_sqlite_integer() {
        assert!(sample(i64::MAX as u64).validate().is_ok());
        assert_eq!(
            sample(u64::MAX).validate(),
            Err(SampleValidationError::OwnerId(u64::MAX))
        );
    }
}
