//! Cache entry and expiration policies

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// How and when an entry leaves the cache on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpirationPolicy {
    /// No expiration; evictable under memory pressure.
    Default,
    /// Invalid at a fixed wall-clock instant, set once at insert.
    Absolute(DateTime<Utc>),
    /// Invalid `duration` after the last successful read.
    Sliding(Duration),
    /// Never expires, never evicted. Removal notifications do not apply.
    Interned,
}

/// One stored value with its lifetime bookkeeping.
///
/// `value` holds the bytes as transformed by the storage codec; the store
/// decodes on the way out. `last_access` drives both sliding expiration
/// and least-recently-accessed trimming.
#[derive(Debug)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub policy: ExpirationPolicy,
    pub last_access: Instant,
    pub notify_on_removal: bool,
}

impl CacheEntry {
    pub fn new(value: Vec<u8>, policy: ExpirationPolicy, notify_on_removal: bool) -> Self {
        // Interned entries never broadcast their removal.
        let notify = notify_on_removal && policy != ExpirationPolicy::Interned;
        Self {
            value,
            policy,
            last_access: Instant::now(),
            notify_on_removal: notify,
        }
    }

    pub fn is_interned(&self) -> bool {
        self.policy == ExpirationPolicy::Interned
    }

    /// Whether the entry is past its lifetime at the given instants.
    pub fn is_expired(&self, now: Instant, wall_now: DateTime<Utc>) -> bool {
        match &self.policy {
            ExpirationPolicy::Default | ExpirationPolicy::Interned => false,
            ExpirationPolicy::Absolute(at) => wall_now >= *at,
            ExpirationPolicy::Sliding(window) => now.duration_since(self.last_access) >= *window,
        }
    }

    /// Refresh the sliding window after a successful read.
    pub fn touch(&mut self, now: Instant) {
        self.last_access = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interned_never_notifies() {
        let e = CacheEntry::new(vec![1], ExpirationPolicy::Interned, true);
        assert!(!e.notify_on_removal);
    }

    #[test]
    fn test_sliding_expiry_window() {
        let mut e = CacheEntry::new(vec![], ExpirationPolicy::Sliding(Duration::from_secs(10)), false);
        let wall = Utc::now();
        assert!(!e.is_expired(Instant::now(), wall));
        assert!(e.is_expired(Instant::now() + Duration::from_secs(11), wall));

        // A touch pushes the window forward.
        e.touch(Instant::now() + Duration::from_secs(5));
        assert!(!e.is_expired(Instant::now() + Duration::from_secs(11), wall));
    }

    #[test]
    fn test_absolute_expiry() {
        let at = Utc::now() + chrono::TimeDelta::seconds(60);
        let e = CacheEntry::new(vec![], ExpirationPolicy::Absolute(at), false);
        assert!(!e.is_expired(Instant::now(), Utc::now()));
        assert!(e.is_expired(Instant::now(), at + chrono::TimeDelta::seconds(1)));
    }
}
