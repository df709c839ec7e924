use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::policy::{
    CaptureWindowDecision, DecisionReason, SchedulePolicy, SolarCalculator, SunEvent,
    SunTimesSource, evaluate_with, next_window_with,
};
use crate::clips::PostWindowCleanup;
use crate::core::{ComponentLogger, LogContext, lock_mutex, lock_read, lock_write};
use crate::stream::StreamId;
use crate::supervisor::StreamSupervisor;
use crate::worker::WorkerSignal;

pub const TICK_STEP: Duration = Duration::from_secs(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Invoked after the last window of the day when `shutdown_when_done` is set.
pub trait ShutdownHook: Send + Sync {
    fn shutdown(&self);
}

/// Powers the machine off through `shutdown`, one minute from now.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdown;

impl ShutdownHook for SystemShutdown {
    fn shutdown(&self) {
        log::warn!("[scheduler] capture window finished, shutting down the system");
        let result = Command::new("shutdown")
            .args(["-h", "+1"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match result {
            Ok(status) if status.success() => {}
            Ok(status) => log::error!("[scheduler] shutdown exited with {}", status),
            Err(e) => log::error!("[scheduler] failed to run shutdown: {}", e),
        }
    }
}

/// Everything one tick needs to decide what should be running.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePlan {
    pub streams: Vec<StreamId>,
    pub output_root: PathBuf,
    pub interval: Duration,
    pub resolution: String,
    pub policy: SchedulePolicy,
    pub shutdown_when_done: bool,
}

#[derive(Debug, Default)]
struct WindowState {
    was_in_window: bool,
    active_event: Option<SunEvent>,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Paused,
    Capturing,
    WindowClosed,
    Idle,
    Failed,
}

struct Shared {
    supervisor: Arc<Mutex<StreamSupervisor>>,
    plan: RwLock<CapturePlan>,
    window: Mutex<WindowState>,
    paused: AtomicBool,
    tick_requested: AtomicBool,
    alive: Arc<AtomicBool>,
    cleanup: Arc<dyn PostWindowCleanup>,
    shutdown: Arc<dyn ShutdownHook>,
    sun: Arc<dyn SunTimesSource>,
}

impl ComponentLogger for Shared {
    fn log_context(&self) -> LogContext {
        LogContext::new("scheduler", "main")
    }
}

/// Tick loop deciding which streams run, and closing out finished windows.
pub struct CaptureScheduler {
    shared: Arc<Shared>,
    signal: Arc<WorkerSignal>,
    handle: Option<JoinHandle<()>>,
    done: Option<Receiver<()>>,
    tick_step: Duration,
}

impl CaptureScheduler {
    pub fn new(
        supervisor: Arc<Mutex<StreamSupervisor>>,
        plan: CapturePlan,
        cleanup: Arc<dyn PostWindowCleanup>,
        shutdown: Arc<dyn ShutdownHook>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                supervisor,
                plan: RwLock::new(plan),
                window: Mutex::new(WindowState::default()),
                paused: AtomicBool::new(false),
                tick_requested: AtomicBool::new(false),
                alive: Arc::new(AtomicBool::new(false)),
                cleanup,
                shutdown,
                sun: Arc::new(SolarCalculator),
            }),
            signal: Arc::new(WorkerSignal::new(false)),
            handle: None,
            done: None,
            tick_step: TICK_STEP,
        }
    }

    /// Only valid before `start`.
    pub fn with_sun_source(mut self, sun: Arc<dyn SunTimesSource>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.sun = sun;
        }
        self
    }

    pub fn with_tick_step(mut self, step: Duration) -> Self {
        self.tick_step = step;
        self
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.signal = Arc::new(WorkerSignal::new(self.is_paused()));
        let (done_tx, done_rx) = channel::bounded(1);
        let shared = self.shared.clone();
        let signal = self.signal.clone();
        let step = self.tick_step;
        self.shared.alive.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("capture-scheduler".to_string())
            .spawn(move || run_loop(shared, signal, step, done_tx))
            .inspect_err(|_| self.shared.alive.store(false, Ordering::SeqCst))
            .context("failed to spawn scheduler thread")?;

        self.handle = Some(handle);
        self.done = Some(done_rx);
        self.shared.info("started");
        Ok(())
    }

    /// Stops the tick loop, waiting a bounded time for it to exit. Workers
    /// are left to the supervisor's owner.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.stop();

        let finished = match self.done.take() {
            Some(done) => !matches!(done.recv_timeout(STOP_TIMEOUT), Err(RecvTimeoutError::Timeout)),
            None => true,
        };
        if finished {
            let _ = handle.join();
            self.shared.info("stopped");
        } else {
            self.shared.warn("tick loop did not exit in time; detached");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.signal.pause();
        self.shared.info("paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        // The loop ticks on its next step once it sees the flag drop.
        self.signal.resume();
        self.shared.info("resumed");
    }

    /// Flag that stays raised while the tick loop thread is alive.
    pub fn liveness(&self) -> Arc<AtomicBool> {
        self.shared.alive.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn update_policy(&self, policy: SchedulePolicy) {
        lock_write(&self.shared.plan, "scheduler.update_policy").policy = policy;
        self.shared.debug("policy updated");
    }

    pub fn update_plan(&self, plan: CapturePlan) {
        *lock_write(&self.shared.plan, "scheduler.update_plan") = plan;
        self.shared.debug("plan updated");
    }

    pub fn plan(&self) -> CapturePlan {
        lock_read(&self.shared.plan, "scheduler.plan").clone()
    }

    pub fn supervisor(&self) -> &Arc<Mutex<StreamSupervisor>> {
        &self.shared.supervisor
    }

    /// Runs one tick against `now`. Panics inside the tick are contained.
    pub fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        self.shared.tick_guarded(now)
    }

    /// Applies the current plan from the caller's thread without running
    /// window-exit actions.
    ///
    /// Inside a window the streams are reconciled right away. Anything else
    /// (closing a window, stopping streams) is left to the tick loop, which
    /// runs a tick on its next step. Returns `Idle` in that case.
    pub fn refresh(&self, now: DateTime<Utc>) -> TickOutcome {
        self.shared.refresh_guarded(now)
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: Arc<Shared>, signal: Arc<WorkerSignal>, step: Duration, done: Sender<()>) {
    let mut last_tick: Option<Instant> = None;
    let mut was_paused = shared.paused.load(Ordering::SeqCst);

    while !signal.is_stopped() {
        let paused = shared.paused.load(Ordering::SeqCst);
        let interval = lock_read(&shared.plan, "scheduler.loop").interval;
        let resumed = was_paused && !paused;
        was_paused = paused;

        let requested = shared.tick_requested.swap(false, Ordering::SeqCst);
        let due = resumed || requested || last_tick.is_none_or(|t| t.elapsed() >= interval);
        if due {
            shared.tick_guarded(Utc::now());
            last_tick = Some(Instant::now());
        }

        if !signal.sleep(step) {
            break;
        }
    }
    shared.alive.store(false, Ordering::SeqCst);
    let _ = done.send(());
}

impl Shared {
    fn tick_guarded(&self, now: DateTime<Utc>) -> TickOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.tick(now))) {
            Ok(outcome) => outcome,
            Err(_) => {
                self.error("tick panicked; continuing with the next tick");
                TickOutcome::Failed
            }
        }
    }

    fn refresh_guarded(&self, now: DateTime<Utc>) -> TickOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.refresh(now))) {
            Ok(outcome) => outcome,
            Err(_) => {
                self.error("refresh panicked");
                TickOutcome::Failed
            }
        }
    }

    fn refresh(&self, now: DateTime<Utc>) -> TickOutcome {
        if self.paused.load(Ordering::SeqCst) {
            return TickOutcome::Paused;
        }

        let plan = lock_read(&self.plan, "scheduler.refresh").clone();
        let decision = evaluate_with(&plan.policy, now, self.sun.as_ref());
        if decision.in_window {
            self.enter_or_stay(&plan, &decision);
            return TickOutcome::Capturing;
        }

        self.tick_requested.store(true, Ordering::SeqCst);
        TickOutcome::Idle
    }

    fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        if self.paused.load(Ordering::SeqCst) {
            return TickOutcome::Paused;
        }

        let plan = lock_read(&self.plan, "scheduler.tick").clone();
        let decision = evaluate_with(&plan.policy, now, self.sun.as_ref());

        if decision.in_window {
            self.enter_or_stay(&plan, &decision);
            return TickOutcome::Capturing;
        }

        let closing = {
            let mut window = lock_mutex(&self.window, "scheduler.tick");
            let closing = window.was_in_window.then_some(window.active_event);
            window.was_in_window = false;
            window.active_event = None;
            closing
        };

        match closing {
            Some(event) => {
                self.close_window(&plan, event);
                TickOutcome::WindowClosed
            }
            None => {
                let mut supervisor = lock_mutex(&self.supervisor, "scheduler.idle");
                if !supervisor.is_empty() {
                    self.info("outside capture window, stopping streams");
                    supervisor.stop_all();
                }
                drop(supervisor);
                if let Some((start, event)) = next_window_with(&plan.policy, now, self.sun.as_ref()) {
                    self.debug(&format!("outside capture window, next {} window at {}", event, start));
                }
                TickOutcome::Idle
            }
        }
    }

    fn enter_or_stay(&self, plan: &CapturePlan, decision: &CaptureWindowDecision) {
        {
            // Only a real sun window arms the exit edge. A disabled schedule
            // disarms it; a fail-open decision leaves it as it was.
            let mut window = lock_mutex(&self.window, "scheduler.enter");
            match decision.event {
                Some(event) => {
                    if !window.was_in_window {
                        self.info(&format!("entered {} window", event));
                    }
                    window.was_in_window = true;
                    window.active_event = Some(event);
                }
                None if decision.reason == DecisionReason::ScheduleDisabled => {
                    *window = WindowState::default();
                }
                None => {}
            }
        }

        let mut supervisor = lock_mutex(&self.supervisor, "scheduler.reconcile");
        supervisor.reconcile(
            &plan.streams,
            &plan.output_root,
            plan.interval,
            &plan.resolution,
            false,
        );
    }

    fn close_window(&self, plan: &CapturePlan, event: Option<SunEvent>) {
        let kind = event.map(SunEvent::as_str).unwrap_or("");
        let label = if kind.is_empty() { "capture" } else { kind };
        self.info(&format!("left {} window, stopping capture", label));

        lock_mutex(&self.supervisor, "scheduler.stop_all").stop_all();
        self.cleanup.convert_and_cleanup(kind);

        if plan.shutdown_when_done {
            self.shutdown.shutdown();
        }
    }
}
