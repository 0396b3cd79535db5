use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Windowed first-sight index over content hashes.
///
/// A hash is accepted exactly once while it remains inside the retention
/// window; entries age out by time and by capacity, oldest first.
#[derive(Debug)]
pub struct DedupIndex {
    inner: Mutex<DedupInner>,
    window: Duration,
    capacity: usize,
}

#[derive(Debug, Default)]
struct DedupInner {
    order: VecDeque<(Instant, String)>,
    keys: HashSet<String>,
}

impl DedupIndex {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(DedupInner::default()),
            window,
            capacity: capacity.max(1),
        }
    }

    /// Returns true when the hash has not been seen inside the window.
    pub fn accept(&self, hash: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        Self::evict_expired(&mut guard, now, self.window);
        if guard.keys.contains(hash) {
            return false;
        }
        guard.keys.insert(hash.to_owned());
        guard.order.push_back((now, hash.to_owned()));
        while guard.order.len() > self.capacity {
            if let Some((_, old)) = guard.order.pop_front() {
                guard.keys.remove(&old);
            }
        }
        true
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.order.clear();
        guard.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(inner: &mut DedupInner, now: Instant, window: Duration) {
        while let Some((seen, _)) = inner.order.front() {
            if now.duration_since(*seen) <= window {
                break;
            }
            if let Some((_, old)) = inner.order.pop_front() {
                inner.keys.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_first_sight_only() {
        let index = DedupIndex::new(Duration::from_secs(60), 16);
        assert!(index.accept("a"));
        assert!(!index.accept("a"));
        assert!(index.accept("b"));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let index = DedupIndex::new(Duration::from_secs(60), 2);
        assert!(index.accept("a"));
        assert!(index.accept("b"));
        assert!(index.accept("c"));
        // "a" aged out by capacity, so it is first-sight again.
        assert!(index.accept("a"));
        assert!(!index.accept("c"));
    }

    #[test]
    fn window_expiry_readmits() {
        let index = DedupIndex::new(Duration::from_millis(0), 16);
        assert!(index.accept("a"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(index.accept("a"));
    }

    #[test]
    fn clear_resets_everything() {
        let index = DedupIndex::new(Duration::from_secs(60), 16);
        assert!(index.accept("a"));
        index.clear();
        assert!(index.is_empty());
        assert!(index.accept("a"));
    }
}
