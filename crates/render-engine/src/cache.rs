//! Shared decoded-frame cache.
//!
//! Frames are keyed by `(source path, requested timestamp)` so clips that
//! reference the same file share entries. The cache is bounded by an LRU
//! policy and internally locked, so it may be shared between sessions.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use cutline_timeline::Timestamp;
use lru::LruCache;
use parking_lot::Mutex;

use crate::frame::Frame;

/// Default number of frames kept.
pub const DEFAULT_CACHE_CAPACITY: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: PathBuf,
    position: Timestamp,
}

/// Hit/miss counters of a [`FrameCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, thread-safe frame cache.
pub struct FrameCache {
    entries: Mutex<LruCache<CacheKey, Frame>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FrameCache {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached frame for `source` at `position`, as a cheap clone.
    pub fn get(&self, source: &Path, position: Timestamp) -> Option<Frame> {
        let key = CacheKey {
            source: source.to_path_buf(),
            position,
        };
        let found = self.entries.lock().get(&key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Stores `frame` under `(source, position)`, evicting the least
    /// recently used entry when full.
    pub fn insert(&self, source: &Path, position: Timestamp, frame: Frame) {
        let key = CacheKey {
            source: source.to_path_buf(),
            position,
        };
        self.entries.lock().put(key, frame);
    }

    pub fn contains(&self, source: &Path, position: Timestamp) -> bool {
        let key = CacheKey {
            source: source.to_path_buf(),
            position,
        };
        self.entries.lock().contains(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn frame(pts_ms: i64) -> Frame {
        Frame::new(
            1,
            1,
            PixelFormat::Gray8,
            Timestamp::from_millis(pts_ms),
            Timestamp::ZERO,
            vec![pts_ms as u8],
        )
        .unwrap()
    }

    #[test]
    fn test_hit_returns_shared_buffer() {
        let cache = FrameCache::new(4);
        let path = Path::new("/media/a.mp4");
        let original = frame(40);
        cache.insert(path, Timestamp::from_millis(40), original.clone());

        let hit = cache.get(path, Timestamp::from_millis(40)).unwrap();
        assert!(hit.shares_buffer(&original));
        assert!(cache.get(Path::new("/media/b.mp4"), Timestamp::from_millis(40)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_lru_eviction_respects_capacity() {
        let cache = FrameCache::new(2);
        let path = Path::new("/media/a.mp4");
        for ms in [0, 40, 80] {
            cache.insert(path, Timestamp::from_millis(ms), frame(ms));
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(path, Timestamp::ZERO));
        assert!(cache.contains(path, Timestamp::from_millis(80)));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let cache = FrameCache::new(0);
        assert_eq!(cache.stats().capacity, 1);
    }
}
