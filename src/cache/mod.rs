//! Local cache tiers
//!
//! Two layers build the per-group local store:
//!
//! - **[`LruCache`]**: single-threaded recency list with per-entry expiry
//!   and an eviction callback (`lru.rs`)
//! - **[`CacheShard`]**: thread-safe wrapper adding byte accounting and
//!   hit/miss counters (`shard.rs`)
//!
//! A group owns two shards: the *main* cache for keys this process is
//! authoritative for, and the *hot* cache mirroring popular keys owned by
//! other peers. The group's eviction loop keeps their combined footprint
//! under the configured byte ceiling.

mod lru;
mod shard;

pub use lru::LruCache;
pub use shard::CacheStats;

pub(crate) use shard::CacheShard;
