//! Delivery Dedup Cache (C2, spec.md §4.2): a bounded map from delivery id to
//! first-seen time, with lazy expiry. Grounded in the teacher's periodic
//! sweep shape (`retention.rs`'s `spawn_retention_task`), adapted to an
//! on-access lazy sweep instead of a dedicated background task, since the
//! dedup window (1h) is far shorter than the cost of a second tokio task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL_SECS: u64 = 3600;

pub struct DedupCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Records `delivery_id` as seen. Returns `true` if it was already
    /// present and not yet expired (i.e. this is a duplicate delivery).
    pub fn check_and_record(&self, delivery_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, t| now.duration_since(*t) < self.ttl);

        if seen.contains_key(delivery_id) {
            return true;
        }
        seen.insert(delivery_id.to_string(), now);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_check_of_same_id_is_duplicate() {
        let cache = DedupCache::new();
        assert!(!cache.check_and_record("d1"));
        assert!(cache.check_and_record("d1"));
    }

    #[test]
    fn expired_entries_are_forgotten() {
        let cache = DedupCache::with_ttl(Duration::from_millis(10));
        assert!(!cache.check_and_record("d1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cache.check_and_record("d1"));
    }

    #[test]
    fn distinct_ids_are_independent() {
        let cache = DedupCache::new();
        assert!(!cache.check_and_record("d1"));
        assert!(!cache.check_and_record("d2"));
    }
}
