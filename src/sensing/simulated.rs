//! In-process location source for the desktop host and for tests: either a
//! scripted list of fixes or a random walk around a starting point.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use rand::Rng;

use super::source::{PermissionStatus, RawFix, SampleSource, SamplingRequest};

/// Roughly five metres of latitude per step.
const DEFAULT_STEP_DEG: f64 = 0.000_05;

struct Walk {
    latitude: f64,
    longitude: f64,
    step_deg: f64,
}

pub struct SimulatedSource {
    foreground: AtomicBool,
    background: AtomicBool,
    registered: AtomicBool,
    registrations: AtomicUsize,
    script: Mutex<VecDeque<RawFix>>,
    walk: Mutex<Option<Walk>>,
    fix_latency: Duration,
}

impl SimulatedSource {
    fn base() -> Self {
        Self {
            foreground: AtomicBool::new(true),
            background: AtomicBool::new(true),
            registered: AtomicBool::new(false),
            registrations: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            walk: Mutex::new(None),
            fix_latency: Duration::ZERO,
        }
    }

    pub fn random_walk(latitude: f64, longitude: f64) -> Self {
        let source = Self::base();
        *source.walk.lock().unwrap_or_else(|p| p.into_inner()) = Some(Walk {
            latitude,
            longitude,
            step_deg: DEFAULT_STEP_DEG,
        });
        source
    }

    /// Yields the given fixes in order, then reports no fix available.
    pub fn scripted(fixes: impl IntoIterator<Item = RawFix>) -> Self {
        let source = Self::base();
        source
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(fixes);
        source
    }

    pub fn with_permissions(self, foreground: bool, background: bool) -> Self {
        self.set_permissions(foreground, background);
        self
    }

    /// Behaves as if the host kept background sampling registered from a
    /// previous process.
    pub fn already_registered(self) -> Self {
        self.registered.store(true, Ordering::SeqCst);
        self
    }

    /// Each fix takes this long to arrive, like a receiver waiting for a lock.
    pub fn with_fix_latency(mut self, latency: Duration) -> Self {
        self.fix_latency = latency;
        self
    }

    pub fn set_permissions(&self, foreground: bool, background: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
        self.background.store(background, Ordering::SeqCst);
    }

    pub fn push_fix(&self, fix: RawFix) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(fix);
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

fn permission(granted: &AtomicBool) -> PermissionStatus {
    if granted.load(Ordering::SeqCst) {
        PermissionStatus::Granted
    } else {
        PermissionStatus::Denied
    }
}

impl SampleSource for SimulatedSource {
    fn request_foreground_permission(&self) -> PermissionStatus {
        permission(&self.foreground)
    }

    fn request_background_permission(&self) -> PermissionStatus {
        permission(&self.background)
    }

    fn current_fix(&self) -> Result<RawFix> {
        if !self.fix_latency.is_zero() {
            std::thread::sleep(self.fix_latency);
        }

        if let Some(fix) = self
            .script
            .lock()
            .map_err(|_| anyhow!("fix script lock poisoned"))?
            .pop_front()
        {
            return Ok(fix);
        }

        let mut state = self
            .walk
            .lock()
            .map_err(|_| anyhow!("walk state lock poisoned"))?;
        let Some(walk) = state.as_mut() else {
            bail!("no location fix available");
        };

        let mut rng = rand::thread_rng();
        walk.latitude = (walk.latitude + rng.gen_range(-walk.step_deg..=walk.step_deg))
            .clamp(-90.0, 90.0);
        walk.longitude = (walk.longitude + rng.gen_range(-walk.step_deg..=walk.step_deg))
            .clamp(-180.0, 180.0);

        Ok(RawFix {
            latitude: walk.latitude,
            longitude: walk.longitude,
            timestamp_ms: Some(Utc::now().timestamp_millis()),
            accuracy_m: Some(rng.gen_range(3.0..12.0)),
        })
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn register(&self, _request: &SamplingRequest) -> Result<()> {
        self.registered.store(true, Ordering::SeqCst);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        self.registered.store(false, Ordering::SeqCst);
        Ok(())
    }
}
