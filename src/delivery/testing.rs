use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use super::{Collector, CollectorPayload, DeliveryError};

/// In-process collector with a switchable network.
pub(crate) struct FakeCollector {
    online: AtomicBool,
    fail_next: AtomicUsize,
    latency: Mutex<Duration>,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<CollectorPayload>>,
}

impl FakeCollector {
    fn with_network(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
            fail_next: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn online() -> Arc<Self> {
        Self::with_network(true)
    }

    pub(crate) fn offline() -> Arc<Self> {
        Self::with_network(false)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// The next `count` attempts fail with HTTP 503 regardless of network.
    pub(crate) fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn delivered(&self) -> Vec<CollectorPayload> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Collector for FakeCollector {
    fn deliver(&self, payload: &CollectorPayload) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let forced_failure = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced_failure {
            return Err(DeliveryError::Status(503));
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport {
                kind: "connection",
                detail: "network unreachable".into(),
            });
        }

        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
