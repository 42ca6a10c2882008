//! Score-trigger integration tests
//!
//! End-to-end scenarios: tracker score changes flow through the event bus,
//! the scheduler debounces them, and a sync starts only when the aggregate
//! crosses the threshold while login has succeeded.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::timeout;

use syncsched::auth::{AuthGate, LoginStatus};
use syncsched::error::SyncschedError;
use syncsched::events::{EventBus, SyncEvent};
use syncsched::registry::CollectionRegistry;
use syncsched::scheduler::{
    SchedulerConfig, SchedulerHandle, SyncRunner, SyncScheduler,
};
use syncsched::tracker::{SCORE_INCREMENT_SMALL, SCORE_INCREMENT_XLARGE};

/// Debounce window used by these tests. Short, but long enough that a burst
/// of bumps lands inside one window.
const TEST_DEBOUNCE: Duration = Duration::from_millis(25);

/// How long to wait before concluding no sync will happen (several debounce
/// windows past the last score change).
const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Runner that records start calls and immediately reports the cycle done.
struct RecordingRunner {
    bus: EventBus,
    starts: AtomicUsize,
    fail: bool,
}

impl RecordingRunner {
    fn new(bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            bus,
            starts: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing(bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            bus,
            starts: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncRunner for RecordingRunner {
    async fn start(&self) -> syncsched::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SyncschedError::SyncStart("refused".to_string()));
        }
        self.bus.publish(SyncEvent::SyncFinished);
        Ok(())
    }
}

struct Harness {
    bus: EventBus,
    registry: Arc<CollectionRegistry>,
    auth: Arc<AuthGate>,
    runner: Arc<RecordingRunner>,
    handle: SchedulerHandle,
}

fn setup(threshold: u32, runner: Arc<RecordingRunner>) -> Harness {
    let bus = runner.bus.clone();
    let registry = Arc::new(CollectionRegistry::new(bus.clone()));
    let auth = Arc::new(AuthGate::new(bus.clone()));

    let config = SchedulerConfig::default()
        .with_threshold(threshold)
        .with_debounce(TEST_DEBOUNCE);
    let handle = SyncScheduler::new(
        registry.clone(),
        auth.clone(),
        runner.clone(),
        bus.clone(),
        config,
    )
    .spawn();

    Harness {
        bus,
        registry,
        auth,
        runner,
        handle,
    }
}

/// Wait until an event matching `pred` arrives, or panic after one second.
async fn wait_for(
    rx: &mut broadcast::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    timeout(Duration::from_secs(1), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Count matching events already sitting in the receiver.
fn drain_count(rx: &mut broadcast::Receiver<SyncEvent>, pred: impl Fn(&SyncEvent) -> bool) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if pred(&event) {
            count += 1;
        }
    }
    count
}

fn is_attempt_started(event: &SyncEvent) -> bool {
    matches!(event, SyncEvent::SyncAttemptStarted)
}

/// A tracker bump publishes the updated score.
#[tokio::test]
async fn test_tracker_score_updated() {
    let bus = EventBus::new();
    let registry = CollectionRegistry::new(bus.clone());
    let tracker = registry.register("rotary").unwrap();
    let mut rx = bus.subscribe();

    assert_eq!(tracker.score(), 0);
    tracker.bump(SCORE_INCREMENT_SMALL);
    assert_eq!(tracker.score(), SCORE_INCREMENT_SMALL);

    let updates = drain_count(&mut rx, |e| matches!(e, SyncEvent::ScoreChanged { .. }));
    assert_eq!(updates, 1);
}

/// A very large score change while logged in triggers exactly one sync and
/// zeroes every tracker.
#[tokio::test]
async fn test_sync_triggered() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::Succeeded);
    let mut rx = h.bus.subscribe();

    tracker.bump(SCORE_INCREMENT_XLARGE);

    wait_for(&mut rx, is_attempt_started).await;
    wait_for(&mut rx, |e| matches!(e, SyncEvent::SyncAttemptFinished)).await;

    assert_eq!(h.runner.start_count(), 1);
    assert_eq!(tracker.score(), 0);
    assert_eq!(h.registry.aggregate_score(), 0);

    h.handle.shutdown().await;
}

/// The clients tracker is not registered like other collections, but its
/// score changes trigger a sync exactly the same way.
#[tokio::test]
async fn test_clients_tracker_sync_triggered() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    h.auth.set_status(LoginStatus::Succeeded);
    let mut rx = h.bus.subscribe();

    h.registry.clients().bump(SCORE_INCREMENT_XLARGE);

    wait_for(&mut rx, is_attempt_started).await;
    wait_for(&mut rx, |e| matches!(e, SyncEvent::SyncAttemptFinished)).await;

    assert_eq!(h.runner.start_count(), 1);
    assert_eq!(h.registry.clients().score(), 0);

    h.handle.shutdown().await;
}

/// Score changes must not trigger a sync when login has not succeeded, and
/// the score must survive the debounce window untouched.
#[tokio::test]
async fn test_incorrect_credentials_sync_not_triggered() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::FailedRejected);
    let mut rx = h.bus.subscribe();

    tracker.bump(100);
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(drain_count(&mut rx, is_attempt_started), 0);
    assert_eq!(h.runner.start_count(), 0);
    assert_eq!(tracker.score(), 100);

    h.handle.shutdown().await;
}

/// Aggregate below the threshold never starts a sync.
#[tokio::test]
async fn test_below_threshold_not_triggered() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::Succeeded);
    let mut rx = h.bus.subscribe();

    tracker.bump(SCORE_INCREMENT_SMALL);
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(drain_count(&mut rx, is_attempt_started), 0);
    assert_eq!(h.runner.start_count(), 0);
    assert_eq!(tracker.score(), SCORE_INCREMENT_SMALL);

    h.handle.shutdown().await;
}

/// A burst of increments inside the debounce window coalesces into a single
/// evaluation and a single sync.
#[tokio::test]
async fn test_burst_coalesced_into_one_sync() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::Succeeded);
    let mut rx = h.bus.subscribe();

    // Each bump alone is below threshold; together they are well past it.
    for _ in 0..20 {
        tracker.bump(10);
    }

    wait_for(&mut rx, is_attempt_started).await;
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(h.runner.start_count(), 1);
    assert_eq!(drain_count(&mut rx, is_attempt_started), 0);
    assert_eq!(tracker.score(), 0);

    h.handle.shutdown().await;
}

/// Disabled collections keep accumulating score but never count toward the
/// trigger decision.
#[tokio::test]
async fn test_disabled_collection_does_not_trigger() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.registry.set_enabled("rotary", false).unwrap();
    h.auth.set_status(LoginStatus::Succeeded);
    let mut rx = h.bus.subscribe();

    tracker.bump(SCORE_INCREMENT_XLARGE);
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(drain_count(&mut rx, is_attempt_started), 0);
    assert_eq!(h.runner.start_count(), 0);
    assert_eq!(tracker.score(), SCORE_INCREMENT_XLARGE);

    h.handle.shutdown().await;
}

/// If the runner fails to start, scores are left in place so the backlog
/// re-triggers on the next score change.
#[tokio::test]
async fn test_failed_start_keeps_score() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::failing(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::Succeeded);
    let mut rx = h.bus.subscribe();

    tracker.bump(SCORE_INCREMENT_XLARGE);

    wait_for(&mut rx, is_attempt_started).await;
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(h.runner.start_count(), 1);
    assert_eq!(tracker.score(), SCORE_INCREMENT_XLARGE);

    // The unconsumed score re-triggers on the next unrelated change.
    tracker.bump(SCORE_INCREMENT_SMALL);
    wait_for(&mut rx, is_attempt_started).await;
    tokio::time::sleep(QUIET_PERIOD).await;
    assert_eq!(h.runner.start_count(), 2);

    h.handle.shutdown().await;
}

/// Score accumulated while unauthenticated syncs once login succeeds,
/// without needing another score change.
#[tokio::test]
async fn test_backlog_synced_after_login_succeeds() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::FailedRejected);
    let mut rx = h.bus.subscribe();

    tracker.bump(SCORE_INCREMENT_XLARGE);
    tokio::time::sleep(QUIET_PERIOD).await;
    assert_eq!(h.runner.start_count(), 0);

    h.auth.set_status(LoginStatus::Succeeded);
    wait_for(&mut rx, is_attempt_started).await;

    assert_eq!(h.runner.start_count(), 1);

    h.handle.shutdown().await;
}

/// Signing out clears all accumulated score (the start-over path).
#[tokio::test]
async fn test_logout_starts_over() {
    let bus = EventBus::new();
    let h = setup(100, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::FailedRejected);

    tracker.bump(SCORE_INCREMENT_XLARGE);
    tokio::time::sleep(QUIET_PERIOD).await;

    h.auth.set_status(LoginStatus::LoggedOut);
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(tracker.score(), 0);
    assert_eq!(h.registry.aggregate_score(), 0);
    assert_eq!(h.runner.start_count(), 0);

    h.handle.shutdown().await;
}

/// The threshold can be retargeted at runtime; the scheduler only compares
/// against whatever value is current.
#[tokio::test]
async fn test_runtime_threshold_change() {
    let bus = EventBus::new();
    let h = setup(1000, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::Succeeded);
    let mut rx = h.bus.subscribe();

    tracker.bump(150);
    tokio::time::sleep(QUIET_PERIOD).await;
    assert_eq!(h.runner.start_count(), 0);

    // Another device appeared; drop to the multi-device tier (100).
    h.handle.set_device_count(2).await;
    tracker.bump(SCORE_INCREMENT_SMALL);

    wait_for(&mut rx, is_attempt_started).await;
    assert_eq!(h.runner.start_count(), 1);

    h.handle.shutdown().await;
}

/// Explicit reset clears scores without a sync.
#[tokio::test]
async fn test_reset_command_clears_scores() {
    let bus = EventBus::new();
    let h = setup(1000, RecordingRunner::new(bus));
    let tracker = h.registry.register("rotary").unwrap();
    h.auth.set_status(LoginStatus::Succeeded);

    tracker.bump(500);
    h.handle.reset().await;
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(tracker.score(), 0);
    assert_eq!(h.runner.start_count(), 0);

    h.handle.shutdown().await;
}
