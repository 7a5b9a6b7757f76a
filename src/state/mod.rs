//! Process-wide proxy state shared by every connection.

use crate::blocklist::Blocklist;
use crate::cache::CacheStore;

/// The cache, the blocklist and their switches.
///
/// Created once at startup, wrapped in an [`Arc`](std::sync::Arc) and handed
/// to every connection task. Both members lock internally; nothing here is
/// reachable as a bare mutable container.
#[derive(Debug, Default)]
pub struct ProxyState {
    cache: CacheStore,
    blocklist: Blocklist,
}

impl ProxyState {
    /// Empty cache and blocklist, both switched off.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    /// Returns the pattern that forbids `host`, if blocking is on and one matches.
    pub fn blocking_pattern(&self, host: &str) -> Option<String> {
        if !self.blocklist.is_enabled() {
            return None;
        }
        self.blocklist.matching_pattern(host)
    }
}
