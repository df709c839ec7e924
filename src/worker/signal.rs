use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::core::{AbortFlag, lock_mutex};

#[derive(Debug, Default, Clone, Copy)]
struct SignalState {
    stopped: bool,
    paused: bool,
}

/// Stop/pause flags shared between a worker handle and its capture loop.
///
/// A loop sleeping out its interval reacts to `stop()` or `pause()`
/// immediately. `resume()` only releases `wait_while_paused`.
#[derive(Debug, Default)]
pub struct WorkerSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
    abort: AbortFlag,
}

impl WorkerSignal {
    pub fn new(paused: bool) -> Self {
        Self {
            state: Mutex::new(SignalState {
                stopped: false,
                paused,
            }),
            condvar: Condvar::new(),
            abort: AbortFlag::new(),
        }
    }

    pub fn stop(&self) {
        lock_mutex(&self.state, "worker_signal.stop").stopped = true;
        self.condvar.notify_all();
    }

    pub fn pause(&self) {
        lock_mutex(&self.state, "worker_signal.pause").paused = true;
        self.condvar.notify_all();
    }

    pub fn resume(&self) {
        lock_mutex(&self.state, "worker_signal.resume").paused = false;
        self.condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        lock_mutex(&self.state, "worker_signal.is_stopped").stopped
    }

    pub fn is_paused(&self) -> bool {
        lock_mutex(&self.state, "worker_signal.is_paused").paused
    }

    /// Kill switch for the tool call currently in flight.
    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    pub fn abort(&self) {
        self.abort.raise();
        self.stop();
    }

    /// Blocks while paused. Returns `false` once the worker is stopped.
    pub fn wait_while_paused(&self) -> bool {
        let guard = lock_mutex(&self.state, "worker_signal.wait_paused");
        let guard = self
            .condvar
            .wait_while(guard, |s| s.paused && !s.stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !guard.stopped
    }

    /// Sleeps up to `duration`, returning early on stop or on a fresh pause.
    /// A resume does not cut the sleep short. Returns `false` if the worker
    /// was stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = lock_mutex(&self.state, "worker_signal.sleep");
        let paused_at_start = guard.paused;

        loop {
            if guard.stopped {
                return false;
            }
            if guard.paused && !paused_at_start {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            guard = match self.condvar.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
