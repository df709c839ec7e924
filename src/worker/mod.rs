//! One capture loop per stream.
//!
//! Each [`StreamWorker`] owns a dedicated thread. External tools run as
//! child processes that are killed when a stop outlives its grace period,
//! and a panic inside the loop is contained to that worker's thread.

pub mod signal;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::core::{ComponentLogger, LogContext, SupervisorError, lock_mutex};
use crate::notify::Notifier;
use crate::stream::{FrameCapture, StreamId, StreamInfo, StreamInfoCache, StreamResolver, resolve_cached};

pub use signal::WorkerSignal;

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(1);

/// Parameters a worker is started with. Changing any of them means a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub stream_id: StreamId,
    pub output_root: PathBuf,
    pub interval: Duration,
    pub resolution: String,
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub cache: Arc<StreamInfoCache>,
    pub resolver: Arc<dyn StreamResolver>,
    pub capture: Arc<dyn FrameCapture>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Default)]
struct WorkerStats {
    running: AtomicBool,
    captures_ok: AtomicU64,
    captures_failed: AtomicU64,
    last_capture_at: Mutex<Option<DateTime<Utc>>>,
    last_output: Mutex<Option<PathBuf>>,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub stream_id: StreamId,
    pub interval: Duration,
    pub running: bool,
    pub paused: bool,
    pub captures_ok: u64,
    pub captures_failed: u64,
    pub last_capture_at: Option<DateTime<Utc>>,
    pub last_output: Option<PathBuf>,
    pub last_error: Option<String>,
}

pub struct StreamWorker {
    config: WorkerConfig,
    deps: WorkerDeps,
    signal: Arc<WorkerSignal>,
    stats: Arc<WorkerStats>,
    handle: Option<JoinHandle<()>>,
    done: Option<Receiver<()>>,
    grace: Duration,
}

impl StreamWorker {
    pub fn new(config: WorkerConfig, deps: WorkerDeps) -> Self {
        Self {
            config,
            deps,
            signal: Arc::new(WorkerSignal::new(false)),
            stats: Arc::new(WorkerStats::default()),
            handle: None,
            done: None,
            grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.config.stream_id
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.stats.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.signal.is_paused()
    }

    /// Spawns the capture loop. A no-op while the loop is already alive.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.handle.is_some() {
            if self.stats.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            // The previous loop exited by itself (e.g. resolve failure).
            self.reap();
        }

        self.signal = Arc::new(WorkerSignal::new(self.signal.is_paused()));
        let (done_tx, done_rx) = channel::bounded(1);

        let capture_loop = CaptureLoop {
            config: self.config.clone(),
            deps: self.deps.clone(),
            signal: self.signal.clone(),
            stats: self.stats.clone(),
        };

        self.stats.running.store(true, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", short_name(&self.config.stream_id)))
            .spawn(move || capture_loop.run_guarded(done_tx));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.done = Some(done_rx);
                self.info("started");
                Ok(())
            }
            Err(source) => {
                self.stats.running.store(false, Ordering::SeqCst);
                Err(SupervisorError::Spawn {
                    stream: self.config.stream_id.to_string(),
                    source,
                })
            }
        }
    }

    pub fn pause(&self) {
        self.signal.pause();
        self.debug("paused");
    }

    pub fn resume(&self) {
        self.signal.resume();
        self.debug("resumed");
    }

    /// Requests termination and waits up to the grace period. A loop still
    /// alive after that has its in-flight tool killed and is detached.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.signal.stop();
        let finished = match self.done.take() {
            Some(done) => !matches!(done.recv_timeout(self.grace), Err(RecvTimeoutError::Timeout)),
            None => true,
        };

        if finished {
            if handle.join().is_err() {
                self.error("capture thread panicked");
            }
            self.info("stopped");
        } else {
            self.signal.abort();
            self.warn(&format!(
                "did not stop within {:?}; killed in-flight capture and detached",
                self.grace
            ));
        }
        self.stats.running.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            stream_id: self.config.stream_id.clone(),
            interval: self.config.interval,
            running: self.is_running(),
            paused: self.is_paused(),
            captures_ok: self.stats.captures_ok.load(Ordering::Relaxed),
            captures_failed: self.stats.captures_failed.load(Ordering::Relaxed),
            last_capture_at: *lock_mutex(&self.stats.last_capture_at, "worker.status"),
            last_output: lock_mutex(&self.stats.last_output, "worker.status").clone(),
            last_error: lock_mutex(&self.stats.last_error, "worker.status").clone(),
        }
    }

    fn reap(&mut self) {
        self.done = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ComponentLogger for StreamWorker {
    fn log_context(&self) -> LogContext {
        LogContext::new("worker", self.config.stream_id.as_str())
    }
}

struct CaptureLoop {
    config: WorkerConfig,
    deps: WorkerDeps,
    signal: Arc<WorkerSignal>,
    stats: Arc<WorkerStats>,
}

impl ComponentLogger for CaptureLoop {
    fn log_context(&self) -> LogContext {
        LogContext::new("capture", self.config.stream_id.as_str())
    }
}

impl CaptureLoop {
    fn run_guarded(self, done: Sender<()>) {
        if catch_unwind(AssertUnwindSafe(|| self.run())).is_err() {
            self.error("capture loop panicked; worker exits");
        }
        self.stats.running.store(false, Ordering::SeqCst);
        let _ = done.send(());
    }

    fn run(&self) {
        let mut info = match self.resolve() {
            Ok(info) => info,
            Err(message) => {
                self.error(&message);
                self.record_error(&message);
                self.deps
                    .notifier
                    .notify("Stream unavailable", &format!("{}: {}", self.config.stream_id, message));
                return;
            }
        };

        let mut failing = false;
        loop {
            if !self.signal.wait_while_paused() {
                break;
            }
            let started = Instant::now();

            // Refresh through the cache so expired playable URLs get renewed.
            match self.resolve() {
                Ok(fresh) => info = fresh,
                Err(message) => self.warn(&format!("refresh failed, reusing last stream info: {}", message)),
            }

            if self.signal.is_stopped() {
                break;
            }

            match self.deps.capture.capture(&info, &self.config.output_root, self.signal.abort_flag()) {
                Ok(path) => {
                    self.stats.captures_ok.fetch_add(1, Ordering::Relaxed);
                    *lock_mutex(&self.stats.last_capture_at, "capture.ok") = Some(Utc::now());
                    self.info(&format!("saved {}", path.display()));
                    *lock_mutex(&self.stats.last_output, "capture.ok") = Some(path);
                    failing = false;
                }
                Err(e) => {
                    if self.signal.is_stopped() {
                        self.debug(&format!("capture abandoned on stop: {}", e));
                        break;
                    }
                    self.stats.captures_failed.fetch_add(1, Ordering::Relaxed);
                    let message = e.to_string();
                    self.error(&format!("capture failed: {}", message));
                    self.record_error(&message);
                    if !failing {
                        self.deps.notifier.notify(
                            "Capture failed",
                            &format!("{}: {}", info.title, message),
                        );
                    }
                    failing = true;
                }
            }

            let sleep_time = self.config.interval.saturating_sub(started.elapsed());
            if !self.signal.sleep(sleep_time) {
                break;
            }
        }

        self.debug("loop exited");
    }

    fn resolve(&self) -> Result<StreamInfo, String> {
        resolve_cached(
            &self.deps.cache,
            self.deps.resolver.as_ref(),
            &self.config.stream_id,
            &self.config.resolution,
            self.signal.abort_flag(),
        )
        .map_err(|e| e.to_string())
    }

    fn record_error(&self, message: &str) {
        *lock_mutex(&self.stats.last_error, "capture.error") = Some(message.to_string());
    }
}

fn short_name(stream: &StreamId) -> String {
    let tail = stream
        .as_str()
        .rsplit(['/', '=', '?'])
        .find(|part| !part.is_empty())
        .unwrap_or("stream");
    tail.chars().take(12).collect()
}
