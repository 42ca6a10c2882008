//! Sync scheduler - the core state machine.
//!
//! The scheduler observes score-changed events, debounces bursts behind a
//! single rearmable deadline, and decides whether to start a sync cycle:
//!
//! 1. `Idle` --(score changed)--> `Pending` (deadline armed)
//! 2. `Pending` --(deadline fires)--> `Checking`
//! 3. `Checking` --(aggregate >= threshold, login succeeded)--> `Syncing`
//!    (runner started, all scores reset)
//! 4. `Checking` --(below threshold or not authenticated)--> `Idle`
//!    (scores untouched, so backlog syncs once login succeeds)
//! 5. `Syncing` --(sync finished)--> `Idle`
//!
//! The scheduler runs as a single task selecting over the event bus, a
//! command channel, and the optional deadline; no two evaluations run
//! concurrently and at most one deadline is outstanding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::auth::{AuthGate, LoginStatus};
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::registry::CollectionRegistry;

/// Threshold when this is the only known device. High, because nothing else
/// will observe the changes anyway.
pub const SINGLE_DEVICE_THRESHOLD: u32 = 300;

/// Threshold when other devices are known to exist.
pub const MULTI_DEVICE_THRESHOLD: u32 = 100;

/// Default debounce window between a score change and evaluation.
pub const SCORE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Capacity of the scheduler command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Threshold tier for a known device count.
pub fn threshold_for_devices(devices: u32) -> u32 {
    if devices <= 1 {
        SINGLE_DEVICE_THRESHOLD
    } else {
        MULTI_DEVICE_THRESHOLD
    }
}

/// Starts synchronization cycles. External collaborator.
///
/// `start` returns once the cycle has begun; completion is reported back on
/// the event bus as `SyncFinished` (or `SyncStartFailed` for a cycle that
/// dies after starting).
#[async_trait]
pub trait SyncRunner: Send + Sync {
    /// Begin a sync cycle.
    async fn start(&self) -> Result<()>;
}

/// Scheduler states. See the module docs for transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing pending.
    Idle,
    /// Deadline armed, coalescing score changes.
    Pending,
    /// Deadline fired, evaluating threshold and auth.
    Checking,
    /// Cycle delegated to the runner, awaiting the finish event.
    Syncing,
}

/// Runtime configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Aggregate score required to trigger a sync.
    pub threshold: u32,
    /// Debounce window between a score change and evaluation.
    pub debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threshold: SINGLE_DEVICE_THRESHOLD,
            debounce: SCORE_DEBOUNCE,
        }
    }
}

impl SchedulerConfig {
    /// Set the initial threshold.
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Commands accepted by a running scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Replace the threshold.
    SetThreshold(u32),
    /// Pick the threshold tier for a known device count.
    SetDeviceCount(u32),
    /// Start over: clear all scores and return to `Idle`.
    Reset,
    /// Stop the scheduler task.
    Shutdown,
}

/// Handle to a spawned scheduler task.
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Replace the threshold.
    pub async fn set_threshold(&self, threshold: u32) {
        let _ = self.cmd_tx.send(SchedulerCommand::SetThreshold(threshold)).await;
    }

    /// Pick the threshold tier for a known device count.
    pub async fn set_device_count(&self, devices: u32) {
        let _ = self.cmd_tx.send(SchedulerCommand::SetDeviceCount(devices)).await;
    }

    /// Clear all scores and return to `Idle`.
    pub async fn reset(&self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Reset).await;
    }

    /// Stop the scheduler and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// The score-driven sync scheduler.
pub struct SyncScheduler {
    registry: Arc<CollectionRegistry>,
    auth: Arc<AuthGate>,
    runner: Arc<dyn SyncRunner>,
    bus: EventBus,
    config: SchedulerConfig,
}

impl SyncScheduler {
    /// Create a scheduler over the given registry, auth gate, and runner.
    pub fn new(
        registry: Arc<CollectionRegistry>,
        auth: Arc<AuthGate>,
        runner: Arc<dyn SyncRunner>,
        bus: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            auth,
            runner,
            bus,
            config,
        }
    }

    /// Spawn the scheduler task and return a command handle.
    ///
    /// The bus subscription is taken before spawning so no event published
    /// after this call can be missed.
    pub fn spawn(self) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let events = self.bus.subscribe();
        let task = tokio::spawn(self.run(cmd_rx, events));
        SchedulerHandle { cmd_tx, task }
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        mut events: tokio::sync::broadcast::Receiver<SyncEvent>,
    ) {
        use tokio::sync::broadcast::error::RecvError;

        let mut state = SchedulerState::Idle;
        let mut threshold = self.config.threshold;
        let mut deadline: Option<Instant> = None;

        log::info!(
            "scheduler started (threshold={}, debounce={:?})",
            threshold,
            self.config.debounce
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SchedulerCommand::SetThreshold(value)) => {
                        log::debug!("threshold set to {value}");
                        threshold = value;
                    }
                    Some(SchedulerCommand::SetDeviceCount(devices)) => {
                        threshold = threshold_for_devices(devices);
                        log::debug!("threshold set to {threshold} for {devices} device(s)");
                    }
                    Some(SchedulerCommand::Reset) => {
                        log::info!("reset requested; clearing scores");
                        self.registry.reset_all();
                        state = SchedulerState::Idle;
                        deadline = None;
                    }
                    Some(SchedulerCommand::Shutdown) | None => break,
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        (state, deadline) = self.handle_event(event, state, deadline);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Coalescing makes lost score events harmless as long
                        // as we evaluate once more.
                        log::warn!("scheduler lagged {missed} events; re-arming");
                        if state == SchedulerState::Idle || state == SchedulerState::Pending {
                            state = SchedulerState::Pending;
                            deadline = Some(Instant::now() + self.config.debounce);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    // The Checking state lives entirely inside this turn; no
                    // event is processed until evaluate returns.
                    deadline = None;
                    state = self.evaluate(threshold).await;
                }
            }
        }

        log::info!("scheduler stopped");
    }

    /// React to one bus event; returns the next (state, deadline) pair.
    fn handle_event(
        &self,
        event: SyncEvent,
        state: SchedulerState,
        deadline: Option<Instant>,
    ) -> (SchedulerState, Option<Instant>) {
        match event {
            SyncEvent::ScoreChanged { collection, score } => match state {
                SchedulerState::Idle | SchedulerState::Pending => {
                    log::trace!("score changed for '{collection}' ({score}); arming deadline");
                    (
                        SchedulerState::Pending,
                        Some(Instant::now() + self.config.debounce),
                    )
                }
                // Mid-cycle changes are bookkeeping only; never arm a
                // second concurrent sync.
                SchedulerState::Checking | SchedulerState::Syncing => (state, deadline),
            },
            SyncEvent::AuthStatusChanged(LoginStatus::LoggedOut) => {
                // Sign-out is the start-over path.
                log::info!("signed out; clearing scores");
                self.registry.reset_all();
                (SchedulerState::Idle, None)
            }
            SyncEvent::AuthStatusChanged(LoginStatus::Succeeded) => {
                if state == SchedulerState::Idle && self.registry.aggregate_score() > 0 {
                    // Score accumulated while unauthenticated; evaluate it now.
                    log::debug!("login succeeded with pending score; arming deadline");
                    (
                        SchedulerState::Pending,
                        Some(Instant::now() + self.config.debounce),
                    )
                } else {
                    (state, deadline)
                }
            }
            SyncEvent::AuthStatusChanged(_) => (state, deadline),
            SyncEvent::SyncFinished => {
                if state == SchedulerState::Syncing {
                    log::info!("sync cycle finished");
                    self.bus.publish(SyncEvent::SyncAttemptFinished);
                    (SchedulerState::Idle, deadline)
                } else {
                    (state, deadline)
                }
            }
            SyncEvent::SyncStartFailed { reason } => {
                if state == SchedulerState::Syncing {
                    log::warn!("sync cycle failed: {reason}");
                    (SchedulerState::Idle, deadline)
                } else {
                    (state, deadline)
                }
            }
            SyncEvent::SyncAttemptStarted | SyncEvent::SyncAttemptFinished => (state, deadline),
        }
    }

    /// The `Checking` step: compare aggregate against the threshold, consult
    /// the auth gate, and start the runner if both permit.
    async fn evaluate(&self, threshold: u32) -> SchedulerState {
        let aggregate = self.registry.aggregate_score();
        if aggregate < threshold {
            log::debug!("aggregate {aggregate} below threshold {threshold}; not syncing");
            return SchedulerState::Idle;
        }

        let status = self.auth.status();
        if !status.is_succeeded() {
            // Normal branch, not an error. Scores stay put so the backlog
            // syncs once authentication succeeds.
            log::info!("aggregate {aggregate} over threshold but login is {status:?}; holding");
            return SchedulerState::Idle;
        }

        log::info!("aggregate {aggregate} over threshold {threshold}; starting sync");
        self.bus.publish(SyncEvent::SyncAttemptStarted);

        match self.runner.start().await {
            Ok(()) => {
                // Reset immediately so in-flight score cannot re-trigger.
                self.registry.reset_all();
                SchedulerState::Syncing
            }
            Err(e) => {
                // Scores untouched; the next score change re-arms evaluation.
                log::warn!("sync failed to start: {e}");
                SchedulerState::Idle
            }
        }
    }
}
