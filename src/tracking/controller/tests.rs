use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::TrackingController;
use crate::db::Ledger;
use crate::delivery::{testing::FakeCollector, CollectorPayload, DeliveryOutcome};
use crate::error::{PermissionScope, TrackerError};
use crate::sensing::{PermissionStatus, RawFix, SampleSource, SamplingRequest, SimulatedSource};
use crate::settings::TrackerSettings;
use crate::tracking::TrackingStatus;

fn fast_settings() -> TrackerSettings {
    TrackerSettings {
        sampling_interval_ms: 20,
        // Keep the scheduled drain out of the way; tests drain explicitly.
        drain_interval_ms: 60_000,
        delivery_timeout_ms: 2_000,
        capture_timeout_ms: 2_000,
        ..TrackerSettings::default()
    }
}

fn open_ledger(dir: &TempDir) -> Ledger {
    Ledger::open(dir.path().join("trackdata.sqlite3")).expect("ledger")
}

async fn controller_with(
    source: Arc<SimulatedSource>,
    collector: Arc<FakeCollector>,
) -> (TempDir, Ledger, TrackingController) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = open_ledger(&dir);
    let controller = TrackingController::new(&fast_settings(), ledger.clone(), source, collector)
        .await
        .expect("controller");
    (dir, ledger, controller)
}

/// Waits until the ledger holds `count` samples or five seconds pass.
async fn wait_for_samples(ledger: &Ledger, count: u64) {
    let mut events = ledger.subscribe();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while ledger.count_samples().await.expect("count") < count {
        tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("sensing loop should store samples")
            .ok();
    }
}

#[tokio::test]
async fn foreground_denial_keeps_tracking_stopped() {
    let source = Arc::new(SimulatedSource::random_walk(10.0, 76.0).with_permissions(false, true));
    let (_dir, _ledger, controller) = controller_with(source.clone(), FakeCollector::online()).await;

    let err = controller.start().await.expect_err("start must fail");
    assert!(matches!(
        err,
        TrackerError::PermissionDenied(PermissionScope::Foreground)
    ));
    assert!(err.user_alert().is_some());
    assert_eq!(controller.snapshot().await.status, TrackingStatus::Stopped);
    assert_eq!(source.registration_count(), 0);
    assert!(!controller.is_active().await);
}

#[tokio::test]
async fn background_denial_keeps_tracking_stopped() {
    let source = Arc::new(SimulatedSource::random_walk(10.0, 76.0).with_permissions(true, false));
    let (_dir, _ledger, controller) = controller_with(source.clone(), FakeCollector::online()).await;

    let err = controller.start().await.expect_err("start must fail");
    assert!(matches!(
        err,
        TrackerError::PermissionDenied(PermissionScope::Background)
    ));
    assert_eq!(controller.snapshot().await.status, TrackingStatus::Stopped);
    assert!(!source.is_registered());
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let source = Arc::new(SimulatedSource::random_walk(10.0, 76.0));
    let (_dir, _ledger, controller) = controller_with(source.clone(), FakeCollector::online()).await;

    controller.stop().await.expect("stop while stopped");

    let state = controller.start().await.expect("start");
    assert_eq!(state.status, TrackingStatus::Running);
    let session_id = state.session_id.clone();
    assert!(session_id.is_some());

    let again = controller.start().await.expect("second start");
    assert_eq!(again.session_id, session_id);
    assert_eq!(source.registration_count(), 1);
    assert!(controller.is_active().await);

    controller.stop().await.expect("stop");
    controller.stop().await.expect("second stop");
    let state = controller.snapshot().await;
    assert_eq!(state.status, TrackingStatus::Stopped);
    assert_eq!(state.session_id, None);
    assert!(!source.is_registered());
    controller.shutdown().await;
}

#[tokio::test]
async fn surviving_registration_resumes_without_reregistering() {
    let source = Arc::new(SimulatedSource::random_walk(10.0, 76.0).already_registered());
    let (_dir, _ledger, controller) = controller_with(source.clone(), FakeCollector::online()).await;

    let state = controller.snapshot().await;
    assert_eq!(state.status, TrackingStatus::Running);
    assert!(state.session_id.is_some());
    assert_eq!(source.registration_count(), 0);
    assert!(controller.is_active().await);

    controller.stop().await.expect("stop");
    assert!(!source.is_registered());
    controller.shutdown().await;
}

#[tokio::test]
async fn flag_toggle_and_offline_capture_reach_collector_in_order() {
    let source = Arc::new(SimulatedSource::scripted([
        RawFix::new(10.0, 76.0),
        RawFix::new(10.0001, 76.0001),
    ]));
    let collector = FakeCollector::online();
    let (_dir, ledger, controller) = controller_with(source, collector.clone()).await;
    controller.set_owner_id(42).await.expect("owner id");

    let first = controller.capture_once().await.expect("capture A");
    assert!(!first.sample.context_flag);
    assert_eq!(
        first.delivery.outcome().await.expect("delivery A"),
        DeliveryOutcome::Delivered
    );

    controller.set_context_flag(true).await;
    assert!(controller.context_flag().await);
    collector.set_online(false);

    let second = controller.capture_once().await.expect("capture B");
    assert!(second.sample.context_flag);
    let second_sample = second.sample.clone();
    assert!(matches!(
        second.delivery.outcome().await.expect("delivery B"),
        DeliveryOutcome::Queued { .. }
    ));
    assert_eq!(controller.pending_count().await.unwrap(), 1);

    let pending = ledger.list_pending(10).await.expect("pending");
    assert!(pending[0].payload.contains("\"contextFlag\":1"));
    assert!(pending[0].payload.contains("\"ownerId\":42"));

    collector.set_online(true);
    controller.agent.settle().await;
    let report = controller.drain_now().await.expect("drain");
    assert_eq!(report.delivered, 1);
    assert_eq!(controller.pending_count().await.unwrap(), 0);

    let delivered = collector.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(!delivered[0].context_flag);
    assert!(delivered[1].context_flag);
    assert_eq!(delivered[1], CollectorPayload::from(&second_sample));

    let history = controller.list_history().await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history[0].id < history[1].id);
    assert_eq!(controller.list_history_for(42).await.unwrap().len(), 2);
    assert!(controller.list_history_for(7).await.unwrap().is_empty());
    controller.shutdown().await;
}

#[tokio::test]
async fn out_of_range_fix_is_rejected_before_storage() {
    let source = Arc::new(SimulatedSource::scripted([RawFix::new(91.0, 0.0)]));
    let collector = FakeCollector::online();
    let (_dir, ledger, controller) = controller_with(source, collector.clone()).await;

    let err = controller.capture_once().await.expect_err("invalid fix");
    assert!(matches!(err, TrackerError::MalformedSample(_)));
    assert!(err.is_recoverable());
    assert_eq!(ledger.count_samples().await.unwrap(), 0);
    assert_eq!(collector.attempts(), 0);
    controller.shutdown().await;
}

#[tokio::test]
async fn storage_failure_is_surfaced_and_nothing_is_sent() {
    let source = Arc::new(SimulatedSource::scripted([RawFix::new(10.0, 76.0)]));
    let collector = FakeCollector::online();
    let (_dir, ledger, controller) = controller_with(source, collector.clone()).await;

    ledger
        .execute(|conn| {
            conn.execute_batch("DROP TABLE samples")?;
            Ok(())
        })
        .await
        .expect("drop table");

    let err = controller.capture_once().await.expect_err("append must fail");
    assert!(matches!(err, TrackerError::StorageFault(_)));
    assert!(!err.is_recoverable());
    assert_eq!(collector.attempts(), 0);
    controller.shutdown().await;
}

#[tokio::test]
async fn sensing_loop_captures_on_schedule() {
    let source = Arc::new(SimulatedSource::scripted([
        RawFix::new(10.0, 76.0),
        RawFix::new(10.001, 76.0),
        RawFix::new(10.002, 76.0),
    ]));
    let collector = FakeCollector::online();
    let (_dir, ledger, controller) = controller_with(source, collector.clone()).await;

    controller.start().await.expect("start");
    assert!(controller.sensing.lock().await.is_running());
    wait_for_samples(&ledger, 3).await;
    controller.stop().await.expect("stop");
    assert!(!controller.sensing.lock().await.is_running());
    controller.shutdown().await;

    assert_eq!(ledger.count_samples().await.unwrap(), 3);
    assert_eq!(collector.delivered().len(), 3);
}

#[tokio::test]
async fn stationary_fixes_are_skipped_by_the_loop() {
    let source = Arc::new(SimulatedSource::scripted([
        RawFix::new(10.0, 76.0),
        RawFix::new(10.0, 76.0),
        RawFix::new(10.0, 76.0),
        RawFix::new(10.01, 76.0),
    ]));
    let (_dir, ledger, controller) = controller_with(source, FakeCollector::online()).await;

    controller.start().await.expect("start");
    wait_for_samples(&ledger, 2).await;
    controller.stop().await.expect("stop");

    assert_eq!(ledger.count_samples().await.unwrap(), 2);
    controller.shutdown().await;
}

#[tokio::test]
async fn clear_history_empties_both_tables() {
    let source = Arc::new(SimulatedSource::random_walk(10.0, 76.0));
    let (_dir, ledger, controller) = controller_with(source, FakeCollector::offline()).await;

    for _ in 0..2 {
        let outcome = controller.capture_once().await.expect("capture");
        outcome.delivery.outcome().await.expect("delivery");
    }
    assert_eq!(controller.pending_count().await.unwrap(), 2);

    controller.clear_history().await.expect("clear");
    assert!(controller.list_history().await.unwrap().is_empty());
    assert_eq!(ledger.count_pending().await.unwrap(), 0);
    controller.shutdown().await;
}

#[tokio::test]
async fn queued_samples_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let source = Arc::new(SimulatedSource::scripted([RawFix::new(10.0, 76.0)]));
        let controller = TrackingController::new(
            &fast_settings(),
            open_ledger(&dir),
            source,
            FakeCollector::offline(),
        )
        .await
        .expect("controller");
        let outcome = controller.capture_once().await.expect("capture");
        assert!(matches!(
            outcome.delivery.outcome().await.expect("delivery"),
            DeliveryOutcome::Queued { .. }
        ));
        controller.shutdown().await;
    }

    let collector = FakeCollector::online();
    let controller = TrackingController::new(
        &fast_settings(),
        open_ledger(&dir),
        Arc::new(SimulatedSource::random_walk(10.0, 76.0)),
        collector.clone(),
    )
    .await
    .expect("controller after restart");

    assert_eq!(controller.pending_count().await.unwrap(), 1);
    let report = controller.drain_now().await.expect("drain");
    assert_eq!(report.delivered, 1);
    assert_eq!(collector.delivered()[0].latitude, 10.0);
    assert_eq!(controller.list_history().await.unwrap().len(), 1);
    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_lets_the_capture_in_flight_land() {
    let source = Arc::new(
        SimulatedSource::scripted([]).with_fix_latency(Duration::from_millis(200)),
    );
    source.push_fix(RawFix::new(10.0, 76.0));
    let collector = FakeCollector::offline();
    collector.set_latency(Duration::from_millis(500));
    let (_dir, ledger, controller) = controller_with(source, collector.clone()).await;

    controller.start().await.expect("start");
    // The first tick fires at 20 ms and the fix takes 200 ms to arrive.
    tokio::time::sleep(Duration::from_millis(80)).await;

    let started = tokio::time::Instant::now();
    controller.stop().await.expect("stop");
    assert!(
        started.elapsed() < Duration::from_millis(450),
        "stop waited on the collector"
    );
    assert_eq!(ledger.count_samples().await.unwrap(), 1);

    controller.shutdown().await;
    assert_eq!(collector.attempts(), 1);
    assert_eq!(ledger.count_pending().await.unwrap(), 1);
    let pending = ledger.list_pending(10).await.unwrap();
    assert_eq!(
        CollectorPayload::from_json(&pending[0].payload).unwrap(),
        CollectorPayload::from(&ledger.list_samples(None).await.unwrap()[0])
    );
}

#[tokio::test]
async fn unstorable_owner_id_is_refused() {
    let source = Arc::new(SimulatedSource::random_walk(10.0, 76.0));
    let (_dir, _ledger, controller) = controller_with(source, FakeCollector::online()).await;
    controller.set_owner_id(9).await.expect("owner id");

    let err = controller
        .set_owner_id(u64::MAX)
        .await
        .expect_err("id beyond i64 range");
    assert!(matches!(err, TrackerError::MalformedSample(_)));
    assert_eq!(controller.owner_id().await, 9);

    let outcome = controller.capture_once().await.expect("capture");
    assert_eq!(outcome.sample.owner_id, 9);
    controller.shutdown().await;
}

/// A platform whose permission prompt crashes its worker.
struct CrashingPermissions;

impl SampleSource for CrashingPermissions {
    fn request_foreground_permission(&self) -> PermissionStatus {
        panic!("permission prompt crashed");
    }

    fn request_background_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    fn current_fix(&self) -> anyhow::Result<RawFix> {
        Ok(RawFix::new(10.0, 76.0))
    }

    fn is_registered(&self) -> bool {
        false
    }

    fn register(&self, _request: &SamplingRequest) -> anyhow::Result<()> {
        Ok(())
    }

    fn unregister(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn crashed_permission_check_returns_to_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = TrackingController::new(
        &fast_settings(),
        open_ledger(&dir),
        Arc::new(CrashingPermissions),
        FakeCollector::online(),
    )
    .await
    .expect("controller");

    let err = controller.start().await.expect_err("start must fail");
    assert!(matches!(err, TrackerError::Source(_)));
    assert_eq!(controller.snapshot().await.status, TrackingStatus::Stopped);
    assert!(!controller.is_active().await);
    controller.shutdown().await;
}
