//! Namespaced TTL cache (spec.md §4.9, §9's "consolidate ad-hoc caches
//! behind a single namespaced TTL cache abstraction"). Used by the
//! Code-Host API Client for `permissions`, `github_api`, `search_results`,
//! `context_stats` namespaces.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: serde_json::Value,
    expires_at: Instant,
}

pub struct TtlCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn namespaced_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        let full_key = Self::namespaced_key(namespace, key);
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&full_key).and_then(|entry| {
            if Instant::now() < entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    pub fn put(&self, namespace: &str, key: &str, value: serde_json::Value) {
        let full_key = Self::namespaced_key(namespace, key);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            full_key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Invalidates every cached entry whose key starts with `prefix` within
    /// `namespace` — used after a write to drop `owner/repo:{pr|issue|
    /// comments}:*` per spec.md §4.9.
    pub fn invalidate_prefix(&self, namespace: &str, prefix: &str) {
        let full_prefix = Self::namespaced_key(namespace, prefix);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|k, _| !k.starts_with(&full_prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.put("github_api", "o/r:issue:1", serde_json::json!({"id": 1}));
        assert_eq!(cache.get("github_api", "o/r:issue:1"), Some(serde_json::json!({"id": 1})));
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = TtlCache::new(Duration::from_millis(5));
        cache.put("github_api", "k", serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get("github_api", "k"), None);
    }

    #[test]
    fn write_invalidates_affected_prefix() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.put("github_api", "o/r:issue:1", serde_json::json!(1));
        cache.put("github_api", "o/r:pr:2", serde_json::json!(2));
        cache.invalidate_prefix("github_api", "o/r:issue:");
        assert_eq!(cache.get("github_api", "o/r:issue:1"), None);
        assert_eq!(cache.get("github_api", "o/r:pr:2"), Some(serde_json::json!(2)));
    }
}
