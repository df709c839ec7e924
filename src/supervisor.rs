//! Keeps the set of running workers in line with the configured streams.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::stream::StreamId;
use crate::worker::{DEFAULT_STOP_GRACE, StreamWorker, WorkerConfig, WorkerDeps, WorkerStatus};

/// Counts of the start/stop actions one reconciliation performed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: usize,
    pub stopped: usize,
    pub restarted: usize,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started == 0 && self.stopped == 0 && self.restarted == 0 && self.failed == 0
    }
}

/// Owns at most one worker per stream.
pub struct StreamSupervisor {
    deps: WorkerDeps,
    workers: BTreeMap<StreamId, StreamWorker>,
    grace: Duration,
}

impl StreamSupervisor {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            deps,
            workers: BTreeMap::new(),
            grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn deps(&self) -> &WorkerDeps {
        &self.deps
    }

    /// Stops workers for streams no longer desired, starts missing ones and
    /// restarts those whose parameters changed. Unchanged workers are left
    /// alone, so calling this repeatedly is cheap.
    pub fn reconcile(
        &mut self,
        desired: &[StreamId],
        output_root: &Path,
        interval: Duration,
        resolution: &str,
        paused: bool,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let desired: BTreeSet<&StreamId> = desired.iter().collect();

        let obsolete: Vec<StreamId> = self
            .workers
            .keys()
            .filter(|id| !desired.contains(id))
            .cloned()
            .collect();
        for id in obsolete {
            if let Some(mut worker) = self.workers.remove(&id) {
                worker.stop();
                report.stopped += 1;
                log::info!("[supervisor] removed {}", id);
            }
        }

        for id in desired {
            let config = WorkerConfig {
                stream_id: id.clone(),
                output_root: output_root.to_path_buf(),
                interval,
                resolution: resolution.to_string(),
            };

            let restart = match self.workers.get(id) {
                Some(existing) if existing.config() == &config && existing.is_running() => continue,
                Some(_) => true,
                None => false,
            };

            if self.add(config, paused) {
                if restart {
                    report.restarted += 1;
                } else {
                    report.started += 1;
                }
            } else {
                report.failed += 1;
            }
        }

        if !report.is_noop() {
            log::info!(
                "[supervisor] reconciled: {} started, {} restarted, {} stopped, {} failed",
                report.started,
                report.restarted,
                report.stopped,
                report.failed
            );
        }
        report
    }

    /// Starts a worker for `config.stream_id`, stopping any existing one
    /// first. Returns `false` if the worker could not be started.
    pub fn add(&mut self, config: WorkerConfig, paused: bool) -> bool {
        let id = config.stream_id.clone();
        if let Some(mut previous) = self.workers.remove(&id) {
            previous.stop();
        }

        let mut worker = StreamWorker::new(config, self.deps.clone()).with_grace(self.grace);
        if paused {
            worker.pause();
        }
        match worker.start() {
            Ok(()) => {
                self.workers.insert(id, worker);
                true
            }
            Err(e) => {
                log::error!("[supervisor] {}", e);
                false
            }
        }
    }

    pub fn remove(&mut self, id: &StreamId) -> bool {
        match self.workers.remove(id) {
            Some(mut worker) => {
                worker.stop();
                true
            }
            None => false,
        }
    }

    /// Recreates every worker with the new interval. Cached stream info is kept.
    pub fn update_interval(&mut self, interval: Duration) {
        let configs: Vec<(WorkerConfig, bool)> = self
            .workers
            .values()
            .map(|w| {
                let mut config = w.config().clone();
                config.interval = interval;
                (config, w.is_paused())
            })
            .collect();

        self.stop_all();
        for (config, paused) in configs {
            self.add(config, paused);
        }
        log::info!("[supervisor] interval set to {}s", interval.as_secs());
    }

    pub fn pause_all(&self) {
        for worker in self.workers.values() {
            worker.pause();
        }
    }

    pub fn resume_all(&self) {
        for worker in self.workers.values() {
            worker.resume();
        }
    }

    /// Stops every worker in parallel; total latency is bounded by the
    /// slowest single grace period.
    pub fn stop_all(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        let count = self.workers.len();
        thread::scope(|scope| {
            for worker in self.workers.values_mut() {
                scope.spawn(move || worker.stop());
            }
        });
        self.workers.clear();
        log::info!("[supervisor] stopped {} worker(s)", count);
    }

    pub fn running_ids(&self) -> Vec<StreamId> {
        self.workers
            .iter()
            .filter(|(_, w)| w.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.workers.values().map(StreamWorker::status).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use crate::stream::StreamInfoCache;
    use crate::testing::mocks::{MockCapture, MockNotifier, MockResolver};

    fn supervisor(capture: Arc<MockCapture>) -> StreamSupervisor {
        StreamSupervisor::new(WorkerDeps {
            cache: Arc::new(StreamInfoCache::new()),
            resolver: Arc::new(MockResolver::new()),
            capture,
            notifier: Arc::new(MockNotifier::new()),
        })
    }

    fn ids(urls: &[&str]) -> Vec<StreamId> {
        urls.iter().map(|u| StreamId::from(*u)).collect()
    }

    #[test]
    fn test_reconcile_starts_and_stops() {
        let mut sup = supervisor(Arc::new(MockCapture::new()));
        let root = Path::new("/tmp/shots");
        let interval = Duration::from_secs(60);

        let report = sup.reconcile(&ids(&["a", "b"]), root, interval, "1080p", false);
        assert_eq!(report.started, 2);
        assert_eq!(sup.len(), 2);

        let report = sup.reconcile(&ids(&["b", "c"]), root, interval, "1080p", false);
        assert_eq!(report.started, 1);
        assert_eq!(report.stopped, 1);
        assert_eq!(sup.running_ids(), ids(&["b", "c"]));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut sup = supervisor(Arc::new(MockCapture::new()));
        let desired = ids(&["a", "b"]);
        let root = Path::new("/tmp/shots");

        sup.reconcile(&desired, root, Duration::from_secs(60), "1080p", false);
        let second = sup.reconcile(&desired, root, Duration::from_secs(60), "1080p", false);

        assert!(second.is_noop());
    }

    #[test]
    fn test_reconcile_restarts_changed_config() {
        let mut sup = supervisor(Arc::new(MockCapture::new()));
        let desired = ids(&["a"]);

        sup.reconcile(&desired, Path::new("/tmp/one"), Duration::from_secs(60), "1080p", false);
        let report = sup.reconcile(&desired, Path::new("/tmp/two"), Duration::from_secs(60), "1080p", false);

        assert_eq!(report.restarted, 1);
        assert_eq!(sup.len(), 1);
    }

    #[test]
    fn test_paused_flag_starts_workers_paused() {
        let capture = Arc::new(MockCapture::new());
        let mut sup = supervisor(capture.clone());

        sup.reconcile(&ids(&["a"]), Path::new("/tmp/shots"), Duration::from_millis(10), "1080p", true);
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(capture.total(), 0);
        assert!(sup.statuses()[0].paused);
    }

    #[test]
    fn test_update_interval_recreates_workers() {
        let mut sup = supervisor(Arc::new(MockCapture::new()));
        sup.reconcile(&ids(&["a", "b"]), Path::new("/tmp/shots"), Duration::from_secs(60), "1080p", false);

        sup.update_interval(Duration::from_secs(30));

        let statuses = sup.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.interval == Duration::from_secs(30) && s.running));
    }

    #[test]
    fn test_stop_all_runs_in_parallel() {
        let capture = Arc::new(MockCapture::new());
        capture.set_delay(Duration::from_secs(5));
        let mut sup = supervisor(capture.clone()).with_grace(Duration::from_millis(300));
        sup.reconcile(&ids(&["a", "b", "c", "d"]), Path::new("/tmp/shots"), Duration::from_secs(1), "1080p", false);

        let deadline = Instant::now() + Duration::from_secs(2);
        while capture.in_flight() < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let started = Instant::now();
        sup.stop_all();

        assert!(started.elapsed() < Duration::from_millis(1_000));
        assert!(sup.is_empty());
    }

    #[test]
    fn test_remove_unknown_stream() {
        let mut sup = supervisor(Arc::new(MockCapture::new()));
        assert!(!sup.remove(&StreamId::from("missing")));
    }
}
