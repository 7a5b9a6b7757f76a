//! Host blocklist.
//!
//! Patterns are plain strings. A host is blocked when a pattern occurs inside
//! the host name or the host name occurs inside a pattern, so `example`
//! blocks `www.example.com` and `www.example.com.evil` blocks `example.com`.
//! Host names are case-insensitive, so patterns and hosts are compared in
//! ASCII lowercase.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info};

/// Thread-safe set of blocked host patterns plus its on/off switch.
///
/// Every access goes through the internal lock, so concurrent control
/// commands and lookups from different connections never interleave inside
/// the set.
#[derive(Debug, Default)]
pub struct Blocklist {
    enabled: AtomicBool,
    patterns: RwLock<HashSet<String>>,
}

impl Blocklist {
    /// Creates an empty, disabled blocklist.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        info!("blocking enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        info!("blocking disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Adds a pattern. Returns `false` if it was already present.
    pub fn add(&self, pattern: impl Into<String>) -> bool {
        let mut pattern = pattern.into();
        pattern.make_ascii_lowercase();
        let added = self.patterns.write().insert(pattern.clone());
        info!(%pattern, added, "blocklist pattern added");
        added
    }

    /// Removes a pattern. Returns `false` if it was not present.
    pub fn remove(&self, pattern: &str) -> bool {
        let pattern = pattern.to_ascii_lowercase();
        let removed = self.patterns.write().remove(&pattern);
        if removed {
            info!(%pattern, "blocklist pattern removed");
        } else {
            debug!(%pattern, "blocklist pattern not present, nothing removed");
        }
        removed
    }

    /// Removes every pattern and returns how many there were.
    pub fn flush(&self) -> usize {
        let mut patterns = self.patterns.write();
        let flushed = patterns.len();
        patterns.clear();
        info!(flushed, "blocklist flushed");
        flushed
    }

    /// Returns the first pattern that blocks `host`, ignoring the switch.
    pub fn matching_pattern(&self, host: &str) -> Option<String> {
        let host = host.to_ascii_lowercase();
        self.patterns
            .read()
            .iter()
            .find(|pattern| host.contains(pattern.as_str()) || pattern.contains(&host))
            .cloned()
    }

    /// Returns `true` if any pattern blocks `host`, ignoring the switch.
    pub fn is_blocked(&self, host: &str) -> bool {
        self.matching_pattern(host).is_some()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.patterns.read().contains(&pattern.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}
