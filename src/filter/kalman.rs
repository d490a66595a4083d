//! One-dimensional recursive smoother applied independently to each axis.
//!
//! The model is a random walk observed directly (state transition and
//! measurement matrices are both 1), so each update reduces to a scalar gain
//! blending the prior estimate with the new reading.

use anyhow::{bail, Result};
use serde::Serialize;

/// Process and measurement noise for one axis. Both are strictly positive,
/// which keeps the gain denominator away from zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseConstants {
    process: f64,
    measurement: f64,
}

impl NoiseConstants {
    pub fn new(process: f64, measurement: f64) -> Result<Self> {
        if !process.is_finite() || process <= 0.0 {
            bail!("process noise must be a positive finite number, got {process}");
        }
        if !measurement.is_finite() || measurement <= 0.0 {
            bail!("measurement noise must be a positive finite number, got {measurement}");
        }
        Ok(Self {
            process,
            measurement,
        })
    }

    pub fn process(&self) -> f64 {
        self.process
    }

    pub fn measurement(&self) -> f64 {
        self.measurement
    }
}

impl Default for NoiseConstants {
    fn default() -> Self {
        Self {
            process: 0.01,
            measurement: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    /// `None` until the first reading arrives.
    estimate: Option<f64>,
    error_covariance: f64,
    process_noise: f64,
    measurement_noise: f64,
}

impl FilterState {
    pub fn new(noise: NoiseConstants) -> Self {
        Self {
            estimate: None,
            error_covariance: 0.0,
            process_noise: noise.process,
            measurement_noise: noise.measurement,
        }
    }

    /// Folds one reading into the estimate and returns the smoothed value.
    pub fn filter(&mut self, measurement: f64) -> f64 {
        let Some(prior) = self.estimate else {
            self.estimate = Some(measurement);
            self.error_covariance = self.measurement_noise;
            return measurement;
        };

        let predicted_covariance = self.error_covariance + self.process_noise;
        let gain = predicted_covariance / (predicted_covariance + self.measurement_noise);
        let estimate = prior + gain * (measurement - prior);

        self.error_covariance = predicted_covariance - gain * predicted_covariance;
        self.estimate = Some(estimate);
        estimate
    }

    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }

    pub fn error_covariance(&self) -> f64 {
        self.error_covariance
    }

    /// Back to the cold state; the next reading seeds the estimate again.
    pub fn reset(&mut self) {
        self.estimate = None;
        self.error_covariance = 0.0;
    }
}

/// Latitude and longitude smoothers for one tracking session. Cross-axis
/// correlation is not modelled.
#[derive(Debug, Clone)]
pub struct CoordinateFilter {
    latitude: FilterState,
    longitude: FilterState,
}

impl CoordinateFilter {
    pub fn new(noise: NoiseConstants) -> Self {
        Self {
            latitude: FilterState::new(noise),
            longitude: FilterState::new(noise),
        }
    }

    pub fn smooth(&mut self, latitude: f64, longitude: f64) -> (f64, f64) {
        (
            self.latitude.filter(latitude),
            self.longitude.filter(longitude),
        )
    }

    pub fn reset(&mut self) {
        self.latitude.reset();
        self.longitude.reset();
    }

    pub fn latitude(&self) -> &FilterState {
        &self.latitude
    }

    pub fn longitude(&self) -> &FilterState {
        &self.longitude
    }
}
