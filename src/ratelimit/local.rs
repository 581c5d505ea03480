//! In-process sliding-window log
//!
//! Used whenever the shared store is absent, failing, or behind an open
//! breaker. Counts are per process, so limits are only enforced per instance
//! on this path.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::WindowDecision;

/// Local hits between sweeps of idle buckets
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug)]
struct Bucket {
    /// Admitted request timestamps, oldest first
    hits: VecDeque<i64>,
    /// Window the bucket was last checked with
    window_ms: i64,
}

#[derive(Debug, Default)]
struct Buckets {
    map: HashMap<String, Bucket>,
    hits_since_sweep: u64,
}

/// Identifier to timestamp-log map guarded by a single lock
#[derive(Debug, Default)]
pub struct LocalWindowStore {
    buckets: Mutex<Buckets>,
}

impl LocalWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prune, count and conditionally insert under one lock acquisition
    pub fn hit(&self, key: &str, now_ms: i64, window_ms: i64, limit: u32) -> WindowDecision {
        let mut buckets = self.buckets.lock();

        buckets.hits_since_sweep += 1;
        if buckets.hits_since_sweep >= SWEEP_EVERY {
            buckets.hits_since_sweep = 0;
            Self::sweep_locked(&mut buckets.map, now_ms);
        }

        let bucket = buckets.map.entry(key.to_string()).or_insert_with(|| Bucket {
            hits: VecDeque::new(),
            window_ms,
        });
        bucket.window_ms = window_ms;

        let cutoff = now_ms.saturating_sub(window_ms);
        while bucket.hits.front().is_some_and(|&ts| ts <= cutoff) {
            bucket.hits.pop_front();
        }

        let count = bucket.hits.len() as u32;
        if count >= limit {
            return WindowDecision {
                allowed: false,
                count,
            };
        }

        bucket.hits.push_back(now_ms);
        WindowDecision {
            allowed: true,
            count: count + 1,
        }
    }

    /// Drop buckets whose newest entry has left its window
    pub fn sweep(&self, now_ms: i64) -> usize {
        let mut buckets = self.buckets.lock();
        Self::sweep_locked(&mut buckets.map, now_ms)
    }

    fn sweep_locked(map: &mut HashMap<String, Bucket>, now_ms: i64) -> usize {
        let before = map.len();
        map.retain(|_, bucket| {
            bucket
                .hits
                .back()
                .is_some_and(|&newest| newest > now_ms.saturating_sub(bucket.window_ms))
        });
        before - map.len()
    }

    /// Number of live buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_then_reject() {
        let store = LocalWindowStore::new();
        for i in 0..3 {
            let decision = store.hit("k", 1_000 + i, 60_000, 3);
            assert!(decision.allowed);
            assert_eq!(decision.count, i as u32 + 1);
        }
        let decision = store.hit("k", 1_010, 60_000, 3);
        assert!(!decision.allowed);
        assert_eq!(decision.count, 3);
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let store = LocalWindowStore::new();
        assert!(store.hit("k", 0, 1_000, 1).allowed);
        assert!(!store.hit("k", 500, 1_000, 1).allowed);
        // Only the admitted hit at t=0 occupies the window.
        assert!(store.hit("k", 1_000, 1_000, 1).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = LocalWindowStore::new();
        assert!(store.hit("a", 0, 1_000, 1).allowed);
        assert!(store.hit("b", 0, 1_000, 1).allowed);
        assert!(!store.hit("a", 1, 1_000, 1).allowed);
    }

    #[test]
    fn test_sweep_removes_idle_buckets() {
        let store = LocalWindowStore::new();
        store.hit("old", 0, 1_000, 5);
        store.hit("fresh", 5_000, 1_000, 5);
        assert_eq!(store.bucket_count(), 2);

        assert_eq!(store.sweep(5_500), 1);
        assert_eq!(store.bucket_count(), 1);
    }
}
