//! Sharded in-memory value store
//!
//! Keys hash onto a fixed set of shards, each behind its own mutex, so
//! user operations and the trim pass contend per shard instead of on one
//! global lock. Expiration is lazy: a read that observes a dead entry
//! removes it before reporting the miss, and the periodic trim pass reaps
//! whatever reads did not touch.

use super::codec::{CodecError, ValueCodec};
use super::entry::{CacheEntry, ExpirationPolicy};
use super::memory::entry_cost;
use crate::tags::KeyPattern;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Shard count; power of two so the hash maps with a mask.
const SHARD_COUNT: usize = 16;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Keys must be non-empty and not whitespace-only.
    #[error("invalid cache key")]
    InvalidKey,

    /// The storage codec rejected the value.
    #[error(transparent)]
    Storage(#[from] CodecError),
}

/// Receiver for removal notifications.
///
/// Invoked synchronously inside the store's per-shard critical section,
/// before the mutating call returns. That is what guarantees an `expire`
/// broadcast is enqueued everywhere before the caller's reply frame is.
pub trait ExpireSink: Send + Sync {
    fn entry_expired(&self, key: &str);
}

/// Sink that discards notifications.
pub struct NullSink;

impl ExpireSink for NullSink {
    fn entry_expired(&self, _key: &str) {}
}

#[derive(Default)]
struct Shard {
    entries: HashMap<String, CacheEntry>,
}

/// Outcome of one trim pass.
#[derive(Debug, Default)]
pub struct TrimReport {
    /// Keys removed because their lifetime ran out.
    pub reaped: Vec<String>,
    /// Keys removed under memory pressure, oldest access first.
    pub evicted: Vec<String>,
}

impl TrimReport {
    /// All keys this pass removed from the store.
    pub fn removed(&self) -> impl Iterator<Item = &String> {
        self.reaped.iter().chain(self.evicted.iter())
    }
}

/// The keyed byte-string cache.
pub struct CacheStore {
    shards: Vec<Mutex<Shard>>,
    codec: Box<dyn ValueCodec>,
    sink: Arc<dyn ExpireSink>,
    /// Approximate bytes held by evictable (non-interned) entries.
    evictable_bytes: AtomicUsize,
    /// Approximate bytes held by interned entries; never trimmed.
    interned_bytes: AtomicUsize,
    /// Trim target for the evictable set.
    ceiling: usize,
}

impl CacheStore {
    pub fn new(codec: Box<dyn ValueCodec>, sink: Arc<dyn ExpireSink>, ceiling: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
            codec,
            sink,
            evictable_bytes: AtomicUsize::new(0),
            interned_bytes: AtomicUsize::new(0),
            ceiling,
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize & (SHARD_COUNT - 1)]
    }

    fn charge(&self, interned: bool, cost: usize) {
        let counter = if interned { &self.interned_bytes } else { &self.evictable_bytes };
        counter.fetch_add(cost, Ordering::Relaxed);
    }

    fn credit(&self, interned: bool, cost: usize) {
        let counter = if interned { &self.interned_bytes } else { &self.evictable_bytes };
        counter.fetch_sub(cost, Ordering::Relaxed);
    }

    /// Look up `key`, refreshing a sliding window on hit.
    ///
    /// An expired entry found here is removed before the miss is reported.
    /// A value the codec cannot restore is removed the same way.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut shard = self.shard_for(key).lock().unwrap();
        let now = Instant::now();

        let expired = match shard.entries.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(now, Utc::now()),
        };
        if expired {
            self.drop_entry(&mut shard, key, true);
            return None;
        }

        let entry = shard.entries.get_mut(key)?;
        match self.codec.decode(&entry.value) {
            Ok(value) => {
                if matches!(entry.policy, ExpirationPolicy::Sliding(_)) {
                    entry.touch(now);
                }
                Some(value)
            }
            Err(e) => {
                warn!("discarding undecodable value for key {}: {}", key, e);
                self.drop_entry(&mut shard, key, true);
                None
            }
        }
    }

    /// Insert or replace. Replacing an entry that asked for removal
    /// notification counts as removing it.
    pub fn set(
        &self,
        key: &str,
        value: &[u8],
        policy: ExpirationPolicy,
        notify_on_removal: bool,
    ) -> Result<(), StoreError> {
        if key.trim().is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let stored = self.codec.encode(value)?;
        let entry = CacheEntry::new(stored, policy, notify_on_removal);
        let cost = entry_cost(key, entry.value.len());
        let interned = entry.is_interned();

        let mut shard = self.shard_for(key).lock().unwrap();
        if let Some(old) = shard.entries.insert(key.to_string(), entry) {
            self.credit(old.is_interned(), entry_cost(key, old.value.len()));
            if old.notify_on_removal {
                self.sink.entry_expired(key);
            }
        }
        self.charge(interned, cost);
        Ok(())
    }

    /// Insert with the interned policy: never expires, never trimmed.
    pub fn add_interned(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.set(key, value, ExpirationPolicy::Interned, false)
    }

    /// Delete `key`, returning the previous value when it decoded cleanly.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        let mut shard = self.shard_for(key).lock().unwrap();
        let old = shard.entries.remove(key)?;
        self.credit(old.is_interned(), entry_cost(key, old.value.len()));
        if old.notify_on_removal {
            self.sink.entry_expired(key);
        }
        self.codec.decode(&old.value).ok()
    }

    /// Enumerate live keys matching `pattern`, interned entries included.
    /// Expired entries observed along the way are reaped.
    pub fn keys(&self, pattern: &KeyPattern) -> Vec<String> {
        let now = Instant::now();
        let wall = Utc::now();
        let mut out = Vec::new();

        for slot in &self.shards {
            let mut shard = slot.lock().unwrap();
            let dead: Vec<String> = shard
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now, wall))
                .map(|(k, _)| k.clone())
                .collect();
            for key in dead {
                self.drop_entry(&mut shard, &key, true);
            }
            out.extend(shard.entries.keys().filter(|k| pattern.matches(k)).cloned());
        }
        out
    }

    /// Remove every non-interned entry without per-key notifications.
    /// Returns the removed keys so the tag index can be reconciled.
    pub fn clear(&self) -> Vec<String> {
        let mut removed = Vec::new();
        for slot in &self.shards {
            let mut shard = slot.lock().unwrap();
            let doomed: Vec<String> = shard
                .entries
                .iter()
                .filter(|(_, e)| !e.is_interned())
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                if let Some(old) = shard.entries.remove(&key) {
                    self.credit(false, entry_cost(&key, old.value.len()));
                    removed.push(key);
                }
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate resident bytes, interned entries included.
    pub fn approx_bytes(&self) -> usize {
        self.evictable_bytes.load(Ordering::Relaxed) + self.interned_bytes.load(Ordering::Relaxed)
    }

    pub fn evictable_bytes(&self) -> usize {
        self.evictable_bytes.load(Ordering::Relaxed)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// One trim pass: reap expired entries, then, while the evictable set
    /// is over the ceiling, evict in least-recently-accessed order.
    ///
    /// Locks one shard at a time throughout; user operations interleave
    /// freely between individual removals.
    pub fn trim_pass(&self) -> TrimReport {
        let mut report = TrimReport::default();
        let now = Instant::now();
        let wall = Utc::now();

        for slot in &self.shards {
            let mut shard = slot.lock().unwrap();
            let dead: Vec<String> = shard
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now, wall))
                .map(|(k, _)| k.clone())
                .collect();
            for key in dead {
                self.drop_entry(&mut shard, &key, true);
                report.reaped.push(key);
            }
        }

        if self.evictable_bytes() <= self.ceiling {
            return report;
        }

        // Snapshot eviction candidates, oldest access first. Entries touched
        // after the snapshot may be evicted slightly out of order; the trim
        // target only needs approximate LRU.
        let mut candidates: Vec<(Instant, String)> = Vec::new();
        for slot in &self.shards {
            let shard = slot.lock().unwrap();
            candidates.extend(
                shard
                    .entries
                    .iter()
                    .filter(|(_, e)| !e.is_interned())
                    .map(|(k, e)| (e.last_access, k.clone())),
            );
        }
        candidates.sort_by_key(|(at, _)| *at);

        for (_, key) in candidates {
            if self.evictable_bytes() <= self.ceiling {
                break;
            }
            let mut shard = self.shard_for(&key).lock().unwrap();
            if shard.entries.get(&key).is_some_and(|e| !e.is_interned()) {
                self.drop_entry(&mut shard, &key, true);
                report.evicted.push(key);
            }
        }

        if !report.evicted.is_empty() {
            debug!(
                "trim evicted {} entries, {} bytes evictable remain",
                report.evicted.len(),
                self.evictable_bytes()
            );
        }
        report
    }

    /// Remove an entry inside an already-held shard lock, adjusting byte
    /// accounting and (optionally) notifying the sink.
    fn drop_entry(&self, shard: &mut Shard, key: &str, notify: bool) {
        if let Some(old) = shard.entries.remove(key) {
            self.credit(old.is_interned(), entry_cost(key, old.value.len()));
            if notify && old.notify_on_removal {
                self.sink.entry_expired(key);
            }
        }
    }
}
