//! The reconciliation loop and its state machine.
//!
//! One `Scheduler` drives one polling loop: `Stopped → Running` on
//! [`start`](Scheduler::start), back on [`stop`](Scheduler::stop), and
//! `Running → Paused → Running` automatically when consecutive pass failures
//! hit the configured threshold. Several independent schedulers may poll the
//! same store concurrently; correctness rides on the eligibility predicate
//! and the permanent activation markers, not on any lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use devflix_bus::events::{MaterialsSynced, ScheduleCheckCompleted};
use devflix_bus::{topics, NotificationBus};
use devflix_cache::CoherentCache;
use devflix_core::config::SchedulerSettings;
use devflix_store::InstanceStore;

use crate::error::SchedulerError;
use crate::reconcile::reconcile_instance;
use crate::summary::{ActivationCounts, InstanceError, PassSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between automatic passes.
    pub check_interval: Duration,
    /// Consecutive top-level failures tolerated before pausing.
    pub error_threshold: u32,
    /// How long a paused loop waits before restarting itself.
    pub cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            error_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            check_interval: Duration::from_secs(settings.check_interval_secs),
            error_threshold: settings.error_threshold,
            cooldown: Duration::from_secs(settings.cooldown_secs),
        }
    }
}

/// Snapshot returned by [`Scheduler::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Whether a pass is in flight right now.
    pub checking: bool,
    /// Start time of the last successful pass.
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub interval_ms: u64,
}

/// `state` changes only under the mutex; `epoch` increments on every
/// transition out of the current lifecycle, so spawned loop and cooldown
/// tasks can detect that the world moved on and bow out.
struct Phase {
    state: SchedulerState,
    epoch: u64,
}

struct SchedulerInner {
    config: SchedulerConfig,
    store: Arc<dyn InstanceStore>,
    cache: CoherentCache,
    bus: NotificationBus,
    phase: Mutex<Phase>,
    checking: AtomicBool,
    consecutive_errors: AtomicU32,
    last_check: Mutex<Option<DateTime<Utc>>>,
    stop_notify: Notify,
}

/// Cheaply cloneable handle; clones share one loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn InstanceStore>,
        cache: CoherentCache,
        bus: NotificationBus,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                store,
                cache,
                bus,
                phase: Mutex::new(Phase {
                    state: SchedulerState::Stopped,
                    epoch: 0,
                }),
                checking: AtomicBool::new(false),
                consecutive_errors: AtomicU32::new(0),
                last_check: Mutex::new(None),
                stop_notify: Notify::new(),
            }),
        }
    }

    /// Begin polling: one immediate pass, then one per interval. Idempotent;
    /// returns `false` when the loop was already running.
    pub fn start(&self) -> bool {
        let epoch = {
            let mut phase = self.lock_phase();
            if phase.state == SchedulerState::Running {
                debug!("scheduler already running");
                return false;
            }
            phase.state = SchedulerState::Running;
            phase.epoch += 1;
            phase.epoch
        };
        self.inner.consecutive_errors.store(0, Ordering::SeqCst);
        info!(
            interval_ms = self.inner.config.check_interval.as_millis() as u64,
            "scheduler started"
        );
        self.spawn_loop(epoch);
        true
    }

    /// Halt polling. An in-flight pass completes, but no further pass starts.
    /// Returns `false` when already stopped.
    pub fn stop(&self) -> bool {
        {
            let mut phase = self.lock_phase();
            if phase.state == SchedulerState::Stopped {
                return false;
            }
            phase.state = SchedulerState::Stopped;
            phase.epoch += 1;
        }
        self.inner.stop_notify.notify_waiters();
        info!("scheduler stopped");
        true
    }

    /// Run one pass right now, regardless of loop state, and return its
    /// summary. Fails with [`SchedulerError::PassInFlight`] instead of
    /// overlapping a pass that is already running.
    pub async fn force_check(&self) -> Result<PassSummary, SchedulerError> {
        self.force_check_at(Utc::now()).await
    }

    /// [`force_check`](Self::force_check) with an explicit evaluation time.
    pub async fn force_check_at(&self, now: DateTime<Utc>) -> Result<PassSummary, SchedulerError> {
        match self.try_pass(now).await {
            Some(result) => result,
            None => Err(SchedulerError::PassInFlight),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.lock_phase().state;
        SchedulerStatus {
            state,
            checking: self.inner.checking.load(Ordering::SeqCst),
            last_check: *self
                .inner
                .last_check
                .lock()
                .expect("scheduler last-check lock poisoned"),
            consecutive_errors: self.inner.consecutive_errors.load(Ordering::SeqCst),
            interval_ms: self.inner.config.check_interval.as_millis() as u64,
        }
    }

    // ── Loop internals ──────────────────────────────────────────────

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.inner.phase.lock().expect("scheduler phase lock poisoned")
    }

    fn phase_matches(&self, state: SchedulerState, epoch: u64) -> bool {
        let phase = self.lock_phase();
        phase.state == state && phase.epoch == epoch
    }

    fn spawn_loop(&self, epoch: u64) {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_loop(epoch).await });
    }

    async fn run_loop(&self, epoch: u64) {
        let mut ticker = tokio::time::interval(self.inner.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.inner.stop_notify.notified() => break,
            }
            if !self.phase_matches(SchedulerState::Running, epoch) {
                break;
            }
            let _ = self.try_pass(Utc::now()).await;
            if !self.phase_matches(SchedulerState::Running, epoch) {
                break;
            }
        }
        debug!(epoch, "scheduler loop exited");
    }

    /// Overlap guard plus bookkeeping around one pass. `None` means another
    /// pass was in flight and this one was skipped.
    async fn try_pass(&self, now: DateTime<Utc>) -> Option<Result<PassSummary, SchedulerError>> {
        if self
            .inner
            .checking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("reconciliation pass already in flight, skipping");
            return None;
        }
        let result = self.run_pass(now).await;
        self.inner.checking.store(false, Ordering::SeqCst);
        match &result {
            Ok(summary) => self.note_pass_success(now, summary),
            Err(error) => self.note_pass_failure(error),
        }
        Some(result)
    }

    async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassSummary, SchedulerError> {
        let clock = std::time::Instant::now();
        let instances = self.inner.store.list_instances().await?;
        debug!(count = instances.len(), "evaluating instances");

        let mut activated = ActivationCounts::default();
        let mut instances_updated = 0u32;
        let mut errors = Vec::new();

        for instance in &instances {
            let Some(staged) = reconcile_instance(instance, now) else {
                continue;
            };
            let staged_total = staged.counts.total();
            match self
                .inner
                .store
                .update_instance(&instance.id, staged.update)
                .await
            {
                Ok(()) => {
                    self.inner.cache.invalidate(&instance.partition_key());
                    self.publish_instance_synced(&instance.path, staged_total);
                    activated.merge(&staged.counts);
                    instances_updated += 1;
                    info!(
                        instance = %instance.id,
                        items = staged_total,
                        "scheduled entities activated"
                    );
                }
                Err(error) => {
                    warn!(
                        instance = %instance.id,
                        error = %error,
                        "instance update failed, continuing pass"
                    );
                    errors.push(InstanceError {
                        instance_id: instance.id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        if instances_updated > 0 {
            self.publish_check_completed(&activated);
        }

        Ok(PassSummary {
            started_at: now,
            elapsed_ms: clock.elapsed().as_millis() as u64,
            activated,
            instances_updated,
            errors,
        })
    }

    fn note_pass_success(&self, now: DateTime<Utc>, summary: &PassSummary) {
        self.inner.consecutive_errors.store(0, Ordering::SeqCst);
        *self
            .inner
            .last_check
            .lock()
            .expect("scheduler last-check lock poisoned") = Some(now);
        if summary.has_changes() {
            info!(
                items = summary.activated.total(),
                instances = summary.instances_updated,
                failed = summary.errors.len(),
                elapsed_ms = summary.elapsed_ms,
                "reconciliation pass applied changes"
            );
        } else {
            debug!(elapsed_ms = summary.elapsed_ms, "reconciliation pass found nothing due");
        }
    }

    fn note_pass_failure(&self, error: &SchedulerError) {
        let failures = self.inner.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            error = %error,
            consecutive = failures,
            "reconciliation pass failed"
        );
        if failures >= self.inner.config.error_threshold {
            self.pause_for_cooldown();
        }
    }

    /// `Running → Paused`, then re-start after the cooldown unless someone
    /// stopped or restarted the scheduler in the meantime.
    fn pause_for_cooldown(&self) {
        let paused_epoch = {
            let mut phase = self.lock_phase();
            if phase.state != SchedulerState::Running {
                return;
            }
            phase.state = SchedulerState::Paused;
            phase.epoch
        };
        warn!(
            cooldown_ms = self.inner.config.cooldown.as_millis() as u64,
            "error threshold reached, scheduler paused"
        );
        self.inner.stop_notify.notify_waiters();

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.inner.config.cooldown).await;
            scheduler.resume_after_cooldown(paused_epoch);
        });
    }

    fn resume_after_cooldown(&self, paused_epoch: u64) {
        let epoch = {
            let mut phase = self.lock_phase();
            if phase.state != SchedulerState::Paused || phase.epoch != paused_epoch {
                debug!("cooldown expired but the scheduler moved on");
                return;
            }
            phase.state = SchedulerState::Running;
            phase.epoch += 1;
            phase.epoch
        };
        self.inner.consecutive_errors.store(0, Ordering::SeqCst);
        info!("cooldown elapsed, scheduler resumed");
        self.spawn_loop(epoch);
    }

    fn publish_instance_synced(&self, path: &str, items_activated: u32) {
        let event = MaterialsSynced {
            path: path.to_string(),
            items_activated,
        };
        match serde_json::to_value(&event) {
            Ok(payload) => self.inner.bus.publish(topics::MATERIALS_SYNCED, payload),
            Err(error) => warn!(error = %error, "failed to encode materials-synced event"),
        }
    }

    fn publish_check_completed(&self, activated: &ActivationCounts) {
        let event = ScheduleCheckCompleted {
            has_changes: true,
            items_activated: activated.total(),
            types: activated.kinds(),
        };
        match serde_json::to_value(&event) {
            Ok(payload) => self
                .inner
                .bus
                .publish(topics::SCHEDULE_CHECK_COMPLETED, payload),
            Err(error) => warn!(error = %error, "failed to encode check-completed event"),
        }
    }
}
