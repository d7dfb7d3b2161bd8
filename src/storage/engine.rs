//! Sharded Mapping Store
//!
//! Holds `code -> long URL` entries, each with its own expiry deadline.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StorageEngine                          │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A code hashes to exactly one shard, so every operation touches a single
//! lock and is atomic for its key. There are no multi-key operations.
//!
//! ## Expiry
//!
//! An entry expires at `put time + ttl`; at that instant and afterwards it
//! is treated as absent. Expired entries are dropped lazily when touched and
//! actively by the [`ExpirySweeper`](crate::storage::ExpirySweeper).

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Number of shards. Must stay a power of two for the index mask.
const NUM_SHARDS: usize = 64;

/// A stored mapping.
#[derive(Debug, Clone)]
struct Entry {
    /// The long URL
    value: String,
    /// Deadline after which the entry reads as absent
    expires_at: Instant,
}

impl Entry {
    fn new(value: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            // Saturate absurd TTLs instead of panicking on overflow
            expires_at: now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX as u64)),
        }
    }

    /// Expiry is inclusive: an entry read exactly at its deadline is gone.
    #[inline]
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<String, Entry>>,
}

/// Counters reported by `INFO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub put_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}

/// The in-memory durable store.
///
/// Wrap it in an `Arc` and share it between the replication consumer (the
/// only writer of new entries) and the request path (readers and deleters).
///
/// # Example
///
/// ```
/// use shortn::storage::StorageEngine;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
/// engine.put("0", "http://example.com", Duration::from_secs(60));
/// assert_eq!(engine.get("0"), Some("http://example.com".to_string()));
/// assert!(engine.delete("0"));
/// assert_eq!(engine.get("0"), None);
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    key_count: AtomicU64,
    get_count: AtomicU64,
    put_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            put_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (NUM_SHARDS - 1)]
    }

    /// Inserts or overwrites a mapping with a fresh TTL.
    ///
    /// Returns `true` if the key was not present (or had expired).
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> bool {
        self.put_count.fetch_add(1, Ordering::Relaxed);

        let key = key.into();
        let mut data = self.shard(&key).data.write();
        match data.insert(key, Entry::new(value.into(), ttl)) {
            None => {
                self.key_count.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(previous) => {
                if previous.is_expired() {
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                }
                previous.is_expired()
            }
        }
    }

    /// Looks up a mapping, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.lookup(key)
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let shard = self.shard(key);

        // Fast path under the read lock
        {
            let data = shard.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut data = shard.data.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.record_expired(1);
                None
            }
            // Rewritten between the two locks
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes a mapping.
    ///
    /// Returns `false` if the key was absent or had already expired.
    pub fn delete(&self, key: &str) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(key).data.write();
        match data.remove(key) {
            Some(entry) if entry.is_expired() => {
                self.record_expired(1);
                false
            }
            Some(_) => {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Checks for a live (unexpired) mapping without counting a read.
    pub fn exists(&self, key: &str) -> bool {
        self.shard(key)
            .data
            .read()
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Approximate number of stored keys, including expired ones not yet reaped.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            put_ops: self.put_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Drops every expired entry. Called by the expiry sweeper.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.data.write();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired());
            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.record_expired(cleaned);
        }
        cleaned
    }

    #[inline]
    fn record_expired(&self, n: u64) {
        self.key_count.fetch_sub(n, Ordering::Relaxed);
        self.expired_count.fetch_add(n, Ordering::Relaxed);
    }
}
