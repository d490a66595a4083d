use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::filter::NoiseConstants;

const COLLECTOR_URL_ENV: &str = "ROUTEKEEPER_COLLECTOR_URL";
const DB_PATH_ENV: &str = "ROUTEKEEPER_DB_PATH";
const DEBUG_ENV: &str = "ROUTEKEEPER_DEBUG";

const MAX_DELIVERY_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterSettings {
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            measurement_noise: 3.0,
        }
    }
}

/// Static tracker configuration. Nothing here is negotiated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub sampling_interval_ms: u64,
    /// Fixes closer than this to the last accepted fix are skipped by the loop.
    pub min_distance_m: f64,
    pub filter: FilterSettings,
    pub collector_url: String,
    pub pending_batch_size: usize,
    pub drain_interval_ms: u64,
    pub delivery_timeout_ms: u64,
    pub capture_timeout_ms: u64,
    pub storage_write_attempts: u32,
    pub db_path: PathBuf,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 10_000,
            min_distance_m: 1.0,
            filter: FilterSettings::default(),
            collector_url: "http://127.0.0.1:8080/insert".into(),
            pending_batch_size: 20,
            drain_interval_ms: 5_000,
            delivery_timeout_ms: MAX_DELIVERY_TIMEOUT_MS,
            capture_timeout_ms: 10_000,
            storage_write_attempts: 2,
            db_path: PathBuf::from("trackdata.sqlite3"),
        }
    }
}

impl TrackerSettings {
    /// Reads the JSON settings file when present, layers environment overrides
    /// on top, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings from {}", path.display()))?;
                serde_json::from_str(&contents).unwrap_or_else(|err| {
                    warn!(
                        "Ignoring unparsable settings file {}: {err}",
                        path.display()
                    );
                    TrackerSettings::default()
                })
            }
            _ => TrackerSettings::default(),
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(COLLECTOR_URL_ENV) {
            if !url.trim().is_empty() {
                self.collector_url = url;
            }
        }
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            if !path.trim().is_empty() {
                self.db_path = PathBuf::from(path);
            }
        }
        let debug_mode = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.sampling_interval_ms = 1_000;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.noise_constants()?;
        if self.sampling_interval_ms == 0 {
            bail!("samplingIntervalMs must be greater than zero");
        }
        if self.drain_interval_ms == 0 {
            bail!("drainIntervalMs must be greater than zero");
        }
        if !self.min_distance_m.is_finite() || self.min_distance_m < 0.0 {
            bail!("minDistanceM must be a non-negative number");
        }
        if self.pending_batch_size == 0 {
            bail!("pendingBatchSize must be greater than zero");
        }
        if self.delivery_timeout_ms == 0 || self.delivery_timeout_ms > MAX_DELIVERY_TIMEOUT_MS {
            bail!("deliveryTimeoutMs must be between 1 and {MAX_DELIVERY_TIMEOUT_MS}");
        }
        if self.capture_timeout_ms == 0 {
            bail!("captureTimeoutMs must be greater than zero");
        }
        if self.storage_write_attempts < 2 {
            bail!("storageWriteAttempts must allow at least one retry");
        }
        if self.collector_url.trim().is_empty() {
            bail!("collectorUrl must not be empty");
        }
        Ok(())
    }

    pub fn noise_constants(&self) -> Result<NoiseConstants> {
        NoiseConstants::new(self.filter.process_noise, self.filter.measurement_noise)
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}
