//! Stream identity, resolved metadata, and the two external capabilities
//! the capture loop depends on: resolving a stream and grabbing a frame.

pub mod cache;
pub mod ffmpeg;
pub mod naming;
pub mod ytdlp;

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AbortFlag, CaptureError, ResolveError};

pub use cache::{DEFAULT_CACHE_DURATION, StreamInfoCache};
pub use ffmpeg::FfmpegCapture;
pub use ytdlp::YtDlpResolver;

const MAX_PREFETCH_THREADS: usize = 50;

/// The configured source URL of one stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Playable-stream metadata. Refreshes replace it, they never mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub playable_url: String,
    pub title: String,
    pub resolution_label: String,
    pub format_id: String,
    pub resolved_at: DateTime<Utc>,
}

pub trait StreamResolver: Send + Sync {
    fn resolve(
        &self,
        stream: &StreamId,
        resolution: &str,
        abort: &AbortFlag,
    ) -> Result<StreamInfo, ResolveError>;
}

pub trait FrameCapture: Send + Sync {
    /// Grabs one frame into `<output_root>/<clean title>/<timestamp>.jpg`.
    fn capture(
        &self,
        info: &StreamInfo,
        output_root: &Path,
        abort: &AbortFlag,
    ) -> Result<PathBuf, CaptureError>;
}

/// Returns cached info when fresh, otherwise resolves and caches it.
pub fn resolve_cached(
    cache: &StreamInfoCache,
    resolver: &dyn StreamResolver,
    stream: &StreamId,
    resolution: &str,
    abort: &AbortFlag,
) -> Result<StreamInfo, ResolveError> {
    if let Some(info) = cache.get(stream) {
        log::debug!("[stream] cache hit for {}", stream);
        return Ok(info);
    }

    log::debug!("[stream] cache miss for {}, resolving", stream);
    let info = resolver.resolve(stream, resolution, abort)?;
    log::info!(
        "[stream] resolved '{}' at {} (format {})",
        info.title,
        info.resolution_label,
        info.format_id
    );
    cache.set(stream, info.clone());
    Ok(info)
}

/// Warms the cache for every uncached stream in parallel. Failures are logged.
pub fn prefetch(
    cache: &StreamInfoCache,
    resolver: &dyn StreamResolver,
    streams: &[StreamId],
    resolution: &str,
) {
    let pending: Vec<&StreamId> = streams
        .iter()
        .filter(|stream| cache.get(stream).is_none())
        .collect();
    if pending.is_empty() {
        return;
    }

    log::debug!("[stream] prefetching {} stream(s)", pending.len());
    let abort = AbortFlag::new();
    for batch in pending.chunks(MAX_PREFETCH_THREADS) {
        thread::scope(|scope| {
            for stream in batch {
                let abort = &abort;
                scope.spawn(move || {
                    if let Err(e) = resolve_cached(cache, resolver, stream, resolution, abort) {
                        log::error!("[stream] prefetch failed for {}: {}", stream, e);
                    }
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockResolver;

    #[test]
    fn test_resolve_cached_hits_resolver_once() {
        let cache = StreamInfoCache::new();
        let resolver = MockResolver::new();
        let stream = StreamId::from("https://youtu.be/one");

        let first = resolve_cached(&cache, &resolver, &stream, "720p", &AbortFlag::new()).unwrap();
        let second = resolve_cached(&cache, &resolver, &stream, "720p", &AbortFlag::new()).unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.calls(&stream), 1);
    }

    #[test]
    fn test_resolve_failure_is_not_cached() {
        let cache = StreamInfoCache::new();
        let resolver = MockResolver::new();
        let stream = StreamId::from("https://youtu.be/bad");
        resolver.fail_for(&stream);

        assert!(resolve_cached(&cache, &resolver, &stream, "720p", &AbortFlag::new()).is_err());
        assert!(cache.get(&stream).is_none());
    }

    #[test]
    fn test_prefetch_skips_cached_streams() {
        let cache = StreamInfoCache::new();
        let resolver = MockResolver::new();
        let a = StreamId::from("https://youtu.be/a");
        let b = StreamId::from("https://youtu.be/b");
        resolve_cached(&cache, &resolver, &a, "1080p", &AbortFlag::new()).unwrap();

        prefetch(&cache, &resolver, &[a.clone(), b.clone()], "1080p");

        assert_eq!(resolver.calls(&a), 1);
        assert_eq!(resolver.calls(&b), 1);
        assert!(cache.get(&b).is_some());
    }
}
