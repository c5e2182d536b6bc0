//! Tool-result request deduplication.
//!
//! A TTL cache keyed by `(session_id, call_id)`. A duplicate tool result
//! inside the TTL window is silently dropped by the caller. Expired
//! entries are evicted opportunistically on reads; when the cache hits
//! capacity, the oldest 20% is purged.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct RequestDeduplicator {
    cache: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl RequestDeduplicator {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    fn key(session_id: &str, call_id: &str) -> String {
        format!("{session_id}:{call_id}")
    }

    /// True when this request was already processed within the TTL.
    pub fn is_duplicate(&self, session_id: &str, call_id: &str) -> bool {
        let key = Self::key(session_id, call_id);
        let mut cache = self.cache.lock();

        let now = Instant::now();
        cache.retain(|_, seen| now.duration_since(*seen) < self.ttl);

        if cache.contains_key(&key) {
            tracing::warn!(
                session_id = %session_id,
                call_id = %call_id,
                "duplicate request detected"
            );
            return true;
        }
        false
    }

    /// Record a processed request.
    pub fn mark_processed(&self, session_id: &str, call_id: &str) {
        let key = Self::key(session_id, call_id);
        let mut cache = self.cache.lock();

        if cache.len() >= self.max_entries {
            tracing::warn!(
                size = cache.len(),
                cap = self.max_entries,
                "dedupe cache full, purging oldest entries"
            );
            Self::purge_oldest(&mut cache);
        }

        cache.insert(key, Instant::now());
    }

    /// Drop the oldest 20% (at least one entry).
    fn purge_oldest(cache: &mut HashMap<String, Instant>) {
        let mut entries: Vec<(String, Instant)> =
            cache.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by_key(|(_, seen)| *seen);

        let remove_count = (entries.len() / 5).max(1);
        for (key, _) in entries.into_iter().take(remove_count) {
            cache.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
