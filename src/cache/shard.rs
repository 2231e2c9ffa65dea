//! Thread-safe byte-accounted cache tier
//!
//! [`CacheShard`] wraps an [`LruCache`] behind a mutex and tracks the total
//! byte footprint of live entries: `Σ key.len() + value.len()`. The inner
//! LRU is built lazily on the first insert. All byte decrements flow through
//! the LRU's eviction callback, so displacement, expiry sweeps, capacity
//! eviction, and explicit removals all keep the accounting exact.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::lru::LruCache;
use crate::byteview::ByteView;

/// Point-in-time statistics for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total bytes of live entries (`key.len() + value.len()` each)
    pub bytes: i64,
    /// Number of live entries
    pub items: i64,
    /// Number of lookups
    pub gets: i64,
    /// Number of lookup hits
    pub hits: i64,
    /// Number of entries that left the cache (evicted, expired, displaced,
    /// or removed)
    pub evictions: i64,
}

/// Byte and eviction accounting shared with the LRU's eviction callback,
/// which runs while the shard mutex is held.
#[derive(Default)]
struct Accounting {
    nbytes: AtomicI64,
    nevict: AtomicI64,
}

/// One tier of a group's local cache (main or hot).
pub(crate) struct CacheShard {
    lru: Mutex<Option<LruCache<String, ByteView>>>,
    acct: Arc<Accounting>,
    nget: AtomicI64,
    nhit: AtomicI64,
}

impl CacheShard {
    pub(crate) fn new() -> Self {
        CacheShard {
            lru: Mutex::new(None),
            acct: Arc::new(Accounting::default()),
            nget: AtomicI64::new(0),
            nhit: AtomicI64::new(0),
        }
    }

    /// Insert `value` under `key`, taking the expiry from the view itself.
    pub(crate) fn add(&self, key: String, value: ByteView) {
        let mut guard = self.lru.lock();
        let lru = guard.get_or_insert_with(|| {
            let mut lru = LruCache::new(0);
            let acct = Arc::clone(&self.acct);
            lru.set_on_evict(move |k: &String, v: &ByteView| {
                acct.nbytes
                    .fetch_sub((k.len() + v.len()) as i64, Ordering::Relaxed);
                acct.nevict.fetch_add(1, Ordering::Relaxed);
            });
            lru
        });
        let added = (key.len() + value.len()) as i64;
        let expire = value.expire();
        lru.add(key, value, expire);
        self.acct.nbytes.fetch_add(added, Ordering::Relaxed);
    }

    pub(crate) fn get(&self, key: &str) -> Option<ByteView> {
        let mut guard = self.lru.lock();
        self.nget.fetch_add(1, Ordering::Relaxed);
        let value = guard.as_mut()?.get(key)?.clone();
        self.nhit.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    pub(crate) fn remove(&self, key: &str) {
        let mut guard = self.lru.lock();
        if let Some(lru) = guard.as_mut() {
            lru.remove(key);
        }
    }

    pub(crate) fn remove_oldest(&self) {
        let mut guard = self.lru.lock();
        if let Some(lru) = guard.as_mut() {
            lru.remove_oldest();
        }
    }

    /// Total bytes of live entries.
    pub(crate) fn bytes(&self) -> i64 {
        self.acct.nbytes.load(Ordering::Relaxed)
    }

    /// Number of live entries.
    pub(crate) fn items(&self) -> i64 {
        let guard = self.lru.lock();
        guard.as_ref().map_or(0, |lru| lru.len() as i64)
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            bytes: self.bytes(),
            items: self.items(),
            gets: self.nget.load(Ordering::Relaxed),
            hits: self.nhit.load(Ordering::Relaxed),
            evictions: self.acct.nevict.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn view(data: &[u8]) -> ByteView {
        ByteView::from_slice(data, None)
    }

    #[test]
    fn test_lazy_construction() {
        let shard = CacheShard::new();
        assert_eq!(shard.bytes(), 0);
        assert_eq!(shard.items(), 0);
        assert_eq!(shard.get("missing"), None);

        let stats = shard.stats();
        assert_eq!(stats.gets, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_byte_accounting_tracks_live_entries() {
        let shard = CacheShard::new();
        shard.add("ab".to_string(), view(b"xyz")); // 2 + 3
        shard.add("c".to_string(), view(b"12345")); // 1 + 5
        assert_eq!(shard.bytes(), 11);
        assert_eq!(shard.items(), 2);

        shard.remove("ab");
        assert_eq!(shard.bytes(), 6);
        assert_eq!(shard.items(), 1);

        shard.remove_oldest();
        assert_eq!(shard.bytes(), 0);
        assert_eq!(shard.items(), 0);
    }

    #[test]
    fn test_overwrite_rebalances_bytes() {
        let shard = CacheShard::new();
        shard.add("k".to_string(), view(b"abcdef"));
        assert_eq!(shard.bytes(), 7);

        shard.add("k".to_string(), view(b"xy"));
        assert_eq!(shard.bytes(), 3);
        assert_eq!(shard.items(), 1);
        // The displaced value counts as an eviction.
        assert_eq!(shard.stats().evictions, 1);
    }

    #[test]
    fn test_get_counters() {
        let shard = CacheShard::new();
        shard.add("k".to_string(), view(b"v"));

        assert!(shard.get("k").is_some());
        assert!(shard.get("k").is_some());
        assert!(shard.get("nope").is_none());

        let stats = shard.stats();
        assert_eq!(stats.gets, 3);
        assert_eq!(stats.hits, 2);
    }

    #[test]
    fn test_expired_entry_releases_bytes() {
        let shard = CacheShard::new();
        let expired = ByteView::from_slice(
            b"value",
            Some(SystemTime::now() - Duration::from_secs(1)),
        );
        shard.add("k".to_string(), expired);
        assert_eq!(shard.bytes(), 6);

        // The lookup sweeps the dead entry and its bytes.
        assert_eq!(shard.get("k"), None);
        assert_eq!(shard.bytes(), 0);
        assert_eq!(shard.stats().evictions, 1);
    }

    #[test]
    fn test_returned_view_equals_inserted() {
        let shard = CacheShard::new();
        shard.add("k".to_string(), view(b"payload"));
        let got = shard.get("k").unwrap();
        assert!(got.eq_bytes(b"payload"));
    }
}
