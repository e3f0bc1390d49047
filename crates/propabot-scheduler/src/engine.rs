use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use propabot_core::config::SchedulerSettings;
use propabot_core::ScheduleConfig;

use crate::clock::Clock;
use crate::error::Result;
use crate::ledger::RunLedger;
use crate::schedule::{catch_up_slot, next_fire_time};
use crate::types::{FireKind, Firing, RunOutcome};

/// Name of the single job slot this scheduler manages.
pub const DAILY_CONTENT_JOB: &str = "daily_content";

pub type RunError = Box<dyn std::error::Error + Send + Sync>;

/// The work executed at every firing.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, firing: &Firing) -> std::result::Result<(), RunError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub catch_up_window: Duration,
    pub misfire_grace: Duration,
    /// Upper bound on a single sleep, so wall-clock jumps are noticed.
    pub max_sleep: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            catch_up_window: Duration::from_secs(300),
            misfire_grace: Duration::from_secs(600),
            max_sleep: Duration::from_secs(60),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerOptions {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            catch_up_window: Duration::from_secs(settings.catch_up_window_secs),
            misfire_grace: Duration::from_secs(settings.misfire_grace_secs),
            ..Self::default()
        }
    }
}

struct ActiveTrigger {
    schedule: ScheduleConfig,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    runner: Arc<dyn JobRunner>,
    clock: Arc<dyn Clock>,
    ledger: RunLedger,
    options: SchedulerOptions,
    in_flight: AtomicBool,
    next_fire: Mutex<Option<DateTime<Utc>>>,
}

/// Owns the `daily_content` trigger.
///
/// At most one trigger task is alive at a time: [`DailyScheduler::configure`]
/// cancels the previous one before installing its replacement.
pub struct DailyScheduler {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveTrigger>>,
}

impl DailyScheduler {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        clock: Arc<dyn Clock>,
        ledger: RunLedger,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                runner,
                clock,
                ledger,
                options,
                in_flight: AtomicBool::new(false),
                next_fire: Mutex::new(None),
            }),
            active: Mutex::new(None),
        }
    }

    /// Install (or replace) the daily trigger. Returns the first fire time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn configure(&self, schedule: ScheduleConfig) -> Result<DateTime<Utc>> {
        schedule.validate()?;
        let first = next_fire_time(&schedule, self.shared.clock.now())?;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = active.take() {
            old.cancel.cancel();
            info!(old = %old.schedule, new = %schedule, "replacing daily trigger");
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(trigger_loop(
            Arc::clone(&self.shared),
            schedule.clone(),
            cancel.clone(),
        ));
        self.shared.set_next_fire(Some(first));
        info!(job = DAILY_CONTENT_JOB, %schedule, next = %first, "daily trigger installed");

        *active = Some(ActiveTrigger {
            schedule,
            cancel,
            task,
        });
        Ok(first)
    }

    pub fn is_scheduled(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    pub fn current(&self) -> Option<ScheduleConfig> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.schedule.clone())
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        *self
            .shared
            .next_fire
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.shared.ledger
    }

    /// Cancel the trigger and wait for its loop to exit. A run already in
    /// progress is left to finish on its own.
    pub async fn shutdown(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = active {
            active.cancel.cancel();
            if let Err(e) = active.task.await {
                warn!(err = %e, "daily trigger task ended abnormally");
            }
            info!("daily trigger stopped");
        }
        self.shared.set_next_fire(None);
    }
}

impl Drop for DailyScheduler {
    fn drop(&mut self) {
        if let Some(active) = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            active.cancel.cancel();
        }
    }
}

impl Shared {
    fn set_next_fire(&self, next: Option<DateTime<Utc>>) {
        *self.next_fire.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Start a run unless one is already in flight. Never blocks the caller.
    fn fire(self: &Arc<Self>, slot: DateTime<Utc>, kind: FireKind) {
        let firing = Firing::new(DAILY_CONTENT_JOB, slot, kind);

        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!(%slot, %kind, "previous run still in progress, skipping firing");
            let shared = Arc::clone(self);
            tokio::spawn(async move {
                let now = shared.clock.now();
                if let Err(e) = shared
                    .ledger
                    .record_skipped(&firing, now, RunOutcome::Overlapped, "previous run still in progress")
                    .await
                {
                    warn!(err = %e, "failed to record skipped run");
                }
            });
            return;
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            info!(run_id = %firing.run_id, %slot, %kind, "daily job started");
            if let Err(e) = shared.ledger.record_start(&firing, shared.clock.now()).await {
                warn!(err = %e, "failed to record run start");
            }

            let runner = Arc::clone(&shared.runner);
            let job = firing.clone();
            let joined = tokio::spawn(async move { runner.run(&job).await }).await;

            let (outcome, detail) = match joined {
                Ok(Ok(())) => {
                    info!(run_id = %firing.run_id, "daily job finished");
                    (RunOutcome::Succeeded, None)
                }
                Ok(Err(e)) => {
                    error!(run_id = %firing.run_id, err = %e, "daily job failed");
                    (RunOutcome::Failed, Some(e.to_string()))
                }
                Err(e) => {
                    error!(run_id = %firing.run_id, err = %e, "daily job panicked");
                    (RunOutcome::Panicked, Some(e.to_string()))
                }
            };
            shared.in_flight.store(false, Ordering::Release);

            if let Err(e) = shared
                .ledger
                .record_finish(&firing.run_id, shared.clock.now(), outcome, detail)
                .await
            {
                warn!(err = %e, "failed to record run result");
            }
        });
    }

    /// Sleep until `target` on the injected clock. Returns `false` if cancelled.
    async fn sleep_until(&self, target: DateTime<Utc>, cancel: &CancellationToken) -> bool {
        loop {
            let remaining = match (target - self.clock.now()).to_std() {
                Ok(d) if !d.is_zero() => d,
                _ => return true,
            };
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(remaining.min(self.options.max_sleep)) => {}
            }
        }
    }
}

async fn trigger_loop(shared: Arc<Shared>, schedule: ScheduleConfig, cancel: CancellationToken) {
    let window = chrono::Duration::from_std(shared.options.catch_up_window)
        .unwrap_or_else(|_| chrono::Duration::zero());
    let grace = chrono::Duration::from_std(shared.options.misfire_grace)
        .unwrap_or_else(|_| chrono::Duration::zero());

    match catch_up_slot(&schedule, shared.clock.now(), window) {
        Ok(Some(slot)) => match shared.ledger.ran_for_slot(DAILY_CONTENT_JOB, slot).await {
            Ok(false) if cancel.is_cancelled() => {}
            Ok(false) => {
                info!(%slot, "configured inside the catch-up window, running now");
                shared.fire(slot, FireKind::CatchUp);
            }
            Ok(true) => debug!(%slot, "slot already ran, no catch-up"),
            Err(e) => warn!(err = %e, "ledger lookup failed, skipping catch-up"),
        },
        Ok(None) => {}
        Err(e) => warn!(err = %e, "could not resolve today's slot"),
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let slot = match next_fire_time(&schedule, shared.clock.now()) {
            Ok(slot) => slot,
            Err(e) => {
                error!(err = %e, "cannot compute next fire time, trigger stopped");
                break;
            }
        };
        shared.set_next_fire(Some(slot));
        debug!(%slot, "waiting for next slot");

        if !shared.sleep_until(slot, &cancel).await {
            break;
        }

        let late = shared.clock.now() - slot;
        if late > grace {
            warn!(%slot, late_secs = late.num_seconds(), "woke past the misfire grace, skipping slot");
            let firing = Firing::new(DAILY_CONTENT_JOB, slot, FireKind::Scheduled);
            let detail = format!("woke {}s late", late.num_seconds());
            if let Err(e) = shared
                .ledger
                .record_skipped(&firing, shared.clock.now(), RunOutcome::Missed, detail)
                .await
            {
                warn!(err = %e, "failed to record missed slot");
            }
            continue;
        }

        shared.fire(slot, FireKind::Scheduled);
    }
    debug!("trigger loop exited");
}
