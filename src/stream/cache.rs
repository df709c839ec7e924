use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{StreamId, StreamInfo};
use crate::core::{lock_read, lock_write};

/// Resolved metadata stays valid for three hours.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    info: StreamInfo,
    expires_at: DateTime<Utc>,
}

/// Time-bounded map from stream to resolved metadata, shared by all workers.
///
/// Expired entries are evicted lazily by the lookup that finds them.
/// Concurrent `set` calls for the same stream resolve last-write-wins.
#[derive(Debug)]
pub struct StreamInfoCache {
    entries: RwLock<HashMap<StreamId, CacheEntry>>,
    duration: chrono::Duration,
}

impl StreamInfoCache {
    pub fn new() -> Self {
        Self::with_duration(DEFAULT_CACHE_DURATION)
    }

    pub fn with_duration(duration: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            duration: chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn get(&self, stream: &StreamId) -> Option<StreamInfo> {
        self.get_at(stream, Utc::now())
    }

    pub fn get_at(&self, stream: &StreamId, now: DateTime<Utc>) -> Option<StreamInfo> {
        {
            let entries = lock_read(&self.entries, "stream_cache.get");
            match entries.get(stream) {
                Some(entry) if now < entry.expires_at => return Some(entry.info.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = lock_write(&self.entries, "stream_cache.evict");
        // Re-check: another worker may have refreshed the entry meanwhile.
        if let Some(entry) = entries.get(stream) {
            if now < entry.expires_at {
                return Some(entry.info.clone());
            }
            entries.remove(stream);
            log::debug!("[stream_cache] evicted expired entry for {}", stream);
        }
        None
    }

    /// Stores `info`, restarting the expiry window from now.
    pub fn set(&self, stream: &StreamId, info: StreamInfo) {
        self.set_at(stream, info, Utc::now());
    }

    pub fn set_at(&self, stream: &StreamId, info: StreamInfo, now: DateTime<Utc>) {
        let expires_at = now.checked_add_signed(self.duration).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = lock_write(&self.entries, "stream_cache.set");
        entries.insert(stream.clone(), CacheEntry { info, expires_at });
    }

    pub fn clear(&self) {
        lock_write(&self.entries, "stream_cache.clear").clear();
    }

    pub fn len(&self) -> usize {
        lock_read(&self.entries, "stream_cache.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StreamInfoCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn info(title: &str) -> StreamInfo {
        StreamInfo {
            playable_url: format!("https://cdn.example/{title}.m3u8"),
            title: title.to_string(),
            resolution_label: "1080p".to_string(),
            format_id: "96".to_string(),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip_before_expiry() {
        let cache = StreamInfoCache::new();
        let id = StreamId::from("https://youtu.be/a");
        let stored = info("a");

        cache.set(&id, stored.clone());

        assert_eq!(cache.get(&id), Some(stored));
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = StreamInfoCache::with_duration(Duration::from_secs(60));
        let id = StreamId::from("https://youtu.be/a");
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        cache.set_at(&id, info("a"), t0);

        assert!(cache.get_at(&id, t0 + chrono::Duration::seconds(59)).is_some());
        assert!(cache.get_at(&id, t0 + chrono::Duration::seconds(60)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_restarts_expiry_window() {
        let cache = StreamInfoCache::with_duration(Duration::from_secs(60));
        let id = StreamId::from("https://youtu.be/a");
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        cache.set_at(&id, info("old"), t0);
        cache.set_at(&id, info("new"), t0 + chrono::Duration::seconds(50));

        let hit = cache.get_at(&id, t0 + chrono::Duration::seconds(100)).unwrap();
        assert_eq!(hit.title, "new");
    }

    #[test]
    fn test_unknown_stream_is_absent() {
        let cache = StreamInfoCache::new();
        assert!(cache.get(&StreamId::from("nope")).is_none());
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = StreamInfoCache::new();
        cache.set(&StreamId::from("a"), info("a"));
        cache.set(&StreamId::from("b"), info("b"));
        assert_eq!(cache.len(), 2);

        cache.clear();

        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_writers_for_different_streams() {
        let cache = std::sync::Arc::new(StreamInfoCache::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let id = StreamId::new(format!("stream-{n}"));
                        cache.set(&id, info(&format!("{n}-{round}")));
                        assert!(cache.get(&id).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("writer thread should complete");
        }

        assert_eq!(cache.len(), 8);
        assert_eq!(cache.get(&StreamId::from("stream-3")).unwrap().title, "3-49");
    }
}
