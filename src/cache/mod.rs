//! Response cache keyed by absolute target URL.
//!
//! Entries are never expired by time. They are replaced when the origin sends
//! a fresh `200` with a `Date` header and dropped only by [`CacheStore::flush`].
//! Turning caching off leaves the entries in place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info};

/// A stored origin response and the marker used to revalidate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    last_modified: Bytes,
    response: Bytes,
}

impl CacheEntry {
    /// `last_modified` is the origin's raw `Date` value; `response` is the
    /// complete wire response it came with.
    pub fn new(last_modified: impl Into<Bytes>, response: impl Into<Bytes>) -> Self {
        Self {
            last_modified: last_modified.into(),
            response: response.into(),
        }
    }

    /// Value sent back as `If-Modified-Since`.
    pub fn last_modified(&self) -> &Bytes {
        &self.last_modified
    }

    /// Bytes handed to the client when the origin answers `304`.
    pub fn response(&self) -> &Bytes {
        &self.response
    }
}

/// Thread-safe cache plus its on/off switch.
///
/// Lookups hand out clones; [`Bytes`] makes those reference-count bumps, so
/// a caller keeps a consistent snapshot even if the entry is replaced or the
/// cache is flushed while its request is in flight.
#[derive(Debug, Default)]
pub struct CacheStore {
    enabled: AtomicBool,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    /// Creates an empty, disabled cache.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        info!("caching enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        info!("caching disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the entry for `target`, if any.
    pub fn get(&self, target: &str) -> Option<CacheEntry> {
        self.entries.read().get(target).cloned()
    }

    /// Inserts or replaces the entry for `target`.
    ///
    /// Returns `true` if an older entry was replaced.
    pub fn insert(&self, target: impl Into<String>, entry: CacheEntry) -> bool {
        let target = target.into();
        let bytes = entry.response.len();
        let replaced = self.entries.write().insert(target.clone(), entry).is_some();
        debug!(%target, bytes, replaced, "response cached");
        replaced
    }

    /// Drops every entry and returns how many there were.
    pub fn flush(&self) -> usize {
        let mut entries = self.entries.write();
        let flushed = entries.len();
        entries.clear();
        info!(flushed, "cache flushed");
        flushed
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entries.read().contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const T: &str = "http://example.com/index.html";

    #[test]
    fn starts_disabled_and_empty() {
        let cache = CacheStore::new();
        assert!(!cache.is_enabled());
        assert!(cache.is_empty());
        assert!(cache.get(T).is_none());
    }

    #[test]
    fn insert_then_overwrite() {
        let cache = CacheStore::new();
        assert!(!cache.insert(T, CacheEntry::new("D1", "first")));
        assert!(cache.insert(T, CacheEntry::new("D2", "second")));
        let entry = cache.get(T).unwrap();
        assert_eq!(&entry.last_modified()[..], b"D2");
        assert_eq!(&entry.response()[..], b"second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn disabling_keeps_entries() {
        let cache = CacheStore::new();
        cache.enable();
        cache.insert(T, CacheEntry::new("D1", "body"));
        cache.disable();
        assert!(cache.contains(T));
    }

    #[test]
    fn flush_clears_everything() {
        let cache = CacheStore::new();
        cache.insert(T, CacheEntry::new("D1", "a"));
        cache.insert("http://other/", CacheEntry::new("D1", "b"));
        assert_eq!(cache.flush(), 2);
        assert!(!cache.contains(T));
    }

    #[test]
    fn snapshot_survives_flush() {
        let cache = CacheStore::new();
        cache.insert(T, CacheEntry::new("D1", "kept"));
        let snapshot = cache.get(T).unwrap();
        cache.flush();
        assert_eq!(&snapshot.response()[..], b"kept");
    }

    #[test]
    fn concurrent_writers_and_flushes() {
        let cache = Arc::new(CacheStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        cache.insert(format!("http://h{t}/{i}"), CacheEntry::new("D", "x"));
                        let _ = cache.get(T);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8 * 200);
    }
}
