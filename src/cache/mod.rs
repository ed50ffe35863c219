//! Shared TTL cache for tool results.
//!
//! Every entry lives for the same configured TTL. Expiry is lazy: a read that
//! observes an expired entry treats it as absent and removes it. Keys that are
//! never read again are dropped by [`TtlCache::purge_expired`], which the
//! server calls from a periodic sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

/// Default TTL when nothing is configured (one day).
pub const DEFAULT_CACHE_TTL_SEC: u64 = 86_400;

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= ttl
    }
}

/// Hit/miss counters since the cache was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct TtlCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_ttl_secs(ttl_secs: u64) -> Self {
        Self::new(Duration::from_secs(ttl_secs))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value for `key`, or `None` if it was never stored
    /// or its TTL has elapsed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return self.miss(),
                Some(entry) if !entry.is_expired(self.ttl, now) => {
                    return self.hit(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        // Expired under the read lock. A writer may have refreshed the entry
        // since, so check again before evicting.
        let mut entries = self.entries.write();
        let refreshed = entries
            .get(key)
            .map(|entry| (!entry.is_expired(self.ttl, now)).then(|| entry.value.clone()));
        match refreshed {
            Some(Some(value)) => {
                drop(entries);
                self.hit(value)
            }
            Some(None) => {
                entries.remove(key);
                drop(entries);
                self.miss()
            }
            None => {
                drop(entries);
                self.miss()
            }
        }
    }

    /// Stores `value` under `key`, replacing any previous entry and restarting
    /// its TTL window.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        self.entries.write().insert(key.into(), entry);
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.ttl, now));
        before - entries.len()
    }

    /// Number of entries in the backing map, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn hit(&self, value: Value) -> Option<Value> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    fn miss(&self) -> Option<Value> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::with_ttl_secs(DEFAULT_CACHE_TTL_SEC)
    }
}

/// Builds the cache key for a call to `operation` with `args`.
///
/// Object keys are sorted at every depth before hashing, so two calls whose
/// arguments differ only in key order share a slot.
pub fn cache_key(operation: &str, args: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(args, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{}:{:x}", operation, digest)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
