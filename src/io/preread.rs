// PAKER - Package Acquisition and Integrity Core
// Async I/O Engine - Smart Pre-Read

//! Recency/frequency scoring of read paths and a small content cache.
//!
//! The engine records every file read here. `candidates` ranks paths by
//! a frequency score with exponential time decay; the engine pre-queues
//! reads for the top scorers and parks the bytes in an LRU content
//! cache that later reads consult first. Pre-reads are best-effort and
//! their failures are silent.

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Decay horizon for the frequency score, in seconds.
const DECAY_SECS: f64 = 3600.0;

#[derive(Debug)]
struct PathScore {
    access_count: u64,
    last_access: Instant,
}

/// Pre-read bookkeeping: path scores plus the pre-read content cache.
pub struct PreReadManager {
    scores: DashMap<PathBuf, PathScore>,
    cache: Mutex<LruCache<PathBuf, Vec<u8>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    enabled: bool,
}

impl PreReadManager {
    /// Create a manager caching at most `capacity` file contents.
    pub fn new(enabled: bool, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            scores: DashMap::new(),
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            enabled,
        }
    }

    /// Whether pre-reading is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Note one read access to `path`.
    pub fn record_access(&self, path: &Path) {
        if !self.enabled {
            return;
        }
        let mut entry = self
            .scores
            .entry(path.to_path_buf())
            .or_insert_with(|| PathScore {
                access_count: 0,
                last_access: Instant::now(),
            });
        entry.access_count += 1;
        entry.last_access = Instant::now();
    }

    /// Look up pre-read contents for `path`, counting hit or miss.
    pub fn lookup(&self, path: &Path) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        let mut cache = self.cache.lock();
        match cache.get(path) {
            Some(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Park pre-read contents for `path`.
    pub fn insert(&self, path: PathBuf, bytes: Vec<u8>) {
        if !self.enabled {
            return;
        }
        self.cache.lock().put(path, bytes);
    }

    /// Drop a cached entry, e.g. after the file was rewritten.
    pub fn invalidate(&self, path: &Path) {
        self.cache.lock().pop(path);
    }

    fn score(entry: &PathScore) -> f64 {
        let age = entry.last_access.elapsed().as_secs_f64();
        entry.access_count as f64 * (-age / DECAY_SECS).exp()
    }

    /// Paths worth pre-reading, best first, excluding already-cached ones.
    pub fn candidates(&self, limit: usize) -> Vec<PathBuf> {
        if !self.enabled {
            return Vec::new();
        }

        let cached: Vec<PathBuf> = {
            let cache = self.cache.lock();
            cache.iter().map(|(p, _)| p.clone()).collect()
        };

        let mut scored: Vec<(PathBuf, f64)> = self
            .scores
            .iter()
            .filter(|r| !cached.contains(r.key()))
            .map(|r| (r.key().clone(), Self::score(r.value())))
            .filter(|(_, s)| *s > 1.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(p, _)| p).collect()
    }

    /// Cache hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_counts_hits_and_misses() {
        let mgr = PreReadManager::new(true, 8);
        let path = PathBuf::from("/tmp/a.txt");

        assert!(mgr.lookup(&path).is_none());
        mgr.insert(path.clone(), b"contents".to_vec());
        assert_eq!(mgr.lookup(&path).as_deref(), Some(b"contents".as_ref()));
        assert!((mgr.hit_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_candidates_ranked_by_frequency() {
        let mgr = PreReadManager::new(true, 8);
        let hot = Path::new("/tmp/hot.txt");
        let cold = Path::new("/tmp/cold.txt");

        for _ in 0..10 {
            mgr.record_access(hot);
        }
        for _ in 0..3 {
            mgr.record_access(cold);
        }

        let candidates = mgr.candidates(2);
        assert_eq!(candidates.first().map(|p| p.as_path()), Some(hot));
        assert_eq!(candidates.get(1).map(|p| p.as_path()), Some(cold));
    }

    #[test]
    fn test_cached_paths_are_not_candidates() {
        let mgr = PreReadManager::new(true, 8);
        let path = Path::new("/tmp/seen.txt");
        for _ in 0..5 {
            mgr.record_access(path);
        }
        mgr.insert(path.to_path_buf(), Vec::from(*b"x"));
        assert!(mgr.candidates(4).is_empty());
    }

    #[test]
    fn test_disabled_manager_is_inert() {
        let mgr = PreReadManager::new(false, 8);
        let path = Path::new("/tmp/a.txt");
        mgr.record_access(path);
        mgr.insert(path.to_path_buf(), Vec::from(*b"x"));
        assert!(mgr.lookup(path).is_none());
        assert!(mgr.candidates(4).is_empty());
    }
}
