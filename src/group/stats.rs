//! Group-level counters
//!
//! All counters are atomic and updated with relaxed ordering; they are
//! observability data, not synchronization points. [`Stats::snapshot`]
//! produces a plain copy for export.

use std::sync::atomic::{AtomicI64, Ordering};

/// Selects one of a group's two cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Keys this process is authoritative for
    Main,
    /// Mirrored popular keys owned by other peers
    Hot,
}

/// Live counters for one group.
#[derive(Debug, Default)]
pub struct Stats {
    /// Every get call, including those served for peers
    pub gets: AtomicI64,

    /// Lookups answered from either cache tier, re-checks included
    pub cache_hits: AtomicI64,

    /// Slowest observed peer fetch in milliseconds. The field name is
    /// historical; the stored value is a maximum.
    pub get_from_peers_latency_lower: AtomicI64,

    /// Successful remote loads or remote cache hits
    pub peer_loads: AtomicI64,

    /// Failed peer fetches
    pub peer_errors: AtomicI64,

    /// Gets that missed the first cache lookup
    pub loads: AtomicI64,

    /// Loads remaining after singleflight deduplication
    pub loads_deduped: AtomicI64,

    /// Successful local loader invocations
    pub local_loads: AtomicI64,

    /// Failed local loader invocations
    pub local_load_errs: AtomicI64,

    /// Inbound requests served on behalf of peers; incremented by the
    /// transport layer
    pub server_requests: AtomicI64,
}

impl Stats {
    /// A plain copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            get_from_peers_latency_lower: self
                .get_from_peers_latency_lower
                .load(Ordering::Relaxed),
            peer_loads: self.peer_loads.load(Ordering::Relaxed),
            peer_errors: self.peer_errors.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            loads_deduped: self.loads_deduped.load(Ordering::Relaxed),
            local_loads: self.local_loads.load(Ordering::Relaxed),
            local_load_errs: self.local_load_errs.load(Ordering::Relaxed),
            server_requests: self.server_requests.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a group's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub gets: i64,
    pub cache_hits: i64,
    pub get_from_peers_latency_lower: i64,
    pub peer_loads: i64,
    pub peer_errors: i64,
    pub loads: i64,
    pub loads_deduped: i64,
    pub local_loads: i64,
    pub local_load_errs: i64,
    pub server_requests: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = Stats::default();
        stats.gets.fetch_add(3, Ordering::Relaxed);
        stats.cache_hits.fetch_add(1, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.gets, 3);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.loads, 0);
    }

    #[test]
    fn test_latency_field_keeps_maximum() {
        let stats = Stats::default();
        for ms in [5, 42, 17] {
            stats
                .get_from_peers_latency_lower
                .fetch_max(ms, Ordering::Relaxed);
        }
        assert_eq!(stats.snapshot().get_from_peers_latency_lower, 42);
    }
}
