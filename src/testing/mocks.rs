use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::clips::PostWindowCleanup;
use crate::core::{AbortFlag, CaptureError, ResolveError, ToolError, lock_mutex};
use crate::notify::Notifier;
use crate::schedule::ShutdownHook;
use crate::stream::{FrameCapture, StreamId, StreamInfo, StreamResolver};

/// Resolves every stream to a `StreamInfo` whose playable URL is the
/// stream id itself.
#[derive(Default)]
pub struct MockResolver {
    calls: Mutex<HashMap<StreamId, usize>>,
    failing: Mutex<HashSet<StreamId>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, stream: &StreamId) {
        lock_mutex(&self.failing, "mock_resolver.fail_for").insert(stream.clone());
    }

    pub fn calls(&self, stream: &StreamId) -> usize {
        lock_mutex(&self.calls, "mock_resolver.calls")
            .get(stream)
            .copied()
            .unwrap_or(0)
    }
}

impl StreamResolver for MockResolver {
    fn resolve(
        &self,
        stream: &StreamId,
        resolution: &str,
        _abort: &AbortFlag,
    ) -> Result<StreamInfo, ResolveError> {
        *lock_mutex(&self.calls, "mock_resolver.resolve")
            .entry(stream.clone())
            .or_insert(0) += 1;

        if lock_mutex(&self.failing, "mock_resolver.resolve").contains(stream) {
            return Err(ResolveError::Metadata {
                stream: stream.to_string(),
                message: "mock resolve failure".to_string(),
            });
        }

        let title = stream
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or("stream")
            .to_string();
        Ok(StreamInfo {
            playable_url: stream.to_string(),
            title,
            resolution_label: resolution.to_string(),
            format_id: "mock".to_string(),
            resolved_at: Utc::now(),
        })
    }
}

/// Records capture attempts per playable URL without touching the disk.
#[derive(Default)]
pub struct MockCapture {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
}

impl MockCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, stream: &StreamId) {
        lock_mutex(&self.failing, "mock_capture.fail_for").insert(stream.to_string());
    }

    /// Every capture blocks this long, or until aborted.
    pub fn set_delay(&self, delay: Duration) {
        *lock_mutex(&self.delay, "mock_capture.set_delay") = Some(delay);
    }

    /// Number of attempts, successful or not.
    pub fn count(&self, stream: &StreamId) -> usize {
        lock_mutex(&self.attempts, "mock_capture.count")
            .get(stream.as_str())
            .map_or(0, Vec::len)
    }

    pub fn attempts(&self, stream: &StreamId) -> Vec<Instant> {
        lock_mutex(&self.attempts, "mock_capture.attempts")
            .get(stream.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        lock_mutex(&self.attempts, "mock_capture.total")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn wait(&self, abort: &AbortFlag) -> Result<(), CaptureError> {
        let Some(delay) = *lock_mutex(&self.delay, "mock_capture.wait") else {
            return Ok(());
        };
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if abort.is_raised() {
                return Err(CaptureError::Tool(ToolError::Aborted {
                    program: "mock".to_string(),
                }));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl FrameCapture for MockCapture {
    fn capture(
        &self,
        info: &StreamInfo,
        output_root: &Path,
        abort: &AbortFlag,
    ) -> Result<PathBuf, CaptureError> {
        lock_mutex(&self.attempts, "mock_capture.capture")
            .entry(info.playable_url.clone())
            .or_default()
            .push(Instant::now());

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let waited = self.wait(abort);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        waited?;

        if lock_mutex(&self.failing, "mock_capture.capture").contains(&info.playable_url) {
            return Err(CaptureError::message("mock capture failure"));
        }
        Ok(output_root.join(&info.title).join("frame.jpg"))
    }
}

#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        lock_mutex(&self.sent, "mock_notifier.sent").clone()
    }
}

impl Notifier for MockNotifier {
    fn notify(&self, title: &str, message: &str) {
        lock_mutex(&self.sent, "mock_notifier.notify").push((title.to_string(), message.to_string()));
    }
}

/// Records the event kind of each cleanup call.
#[derive(Default)]
pub struct MockCleanup {
    events: Mutex<Vec<String>>,
    panic_next: Mutex<bool>,
}

impl MockCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        lock_mutex(&self.events, "mock_cleanup.events").clone()
    }

    pub fn panic_next(&self) {
        *lock_mutex(&self.panic_next, "mock_cleanup.panic_next") = true;
    }
}

impl PostWindowCleanup for MockCleanup {
    fn convert_and_cleanup(&self, event_kind: &str) {
        lock_mutex(&self.events, "mock_cleanup.convert").push(event_kind.to_string());
        let should_panic = std::mem::take(&mut *lock_mutex(&self.panic_next, "mock_cleanup.convert"));
        if should_panic {
            panic!("mock cleanup failure");
        }
    }
}

#[derive(Default)]
pub struct MockShutdown {
    calls: AtomicUsize,
}

impl MockShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShutdownHook for MockShutdown {
    fn shutdown(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
