//! meshcache: a distributed read-through in-process cache
//!
//! A process joins a cluster of identical peers; consistent hashing assigns
//! every key an authoritative owner. On a miss, the owner loads the value
//! through a user-supplied [`Loader`] and caches it; everyone else fetches
//! it from the owner and may mirror it locally. Concurrent requests for the
//! same key collapse to one load per process.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Group ("scores")                        │
//! │                                                              │
//! │  get ──▶ main cache ──▶ hot cache ──▶ singleflight load      │
//! │              ▲              ▲               │                │
//! │              │              │        ┌──────┴───────┐        │
//! │          local owner    remote owner │              │        │
//! │          Loader ────────▶ PeerClient ───▶ peer "B"  │        │
//! │              └── HashRing picks the owner ──────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`ByteView`]**: immutable byte/string value with optional expiry
//! - **[`cache`]**: the two local tiers (recency list + byte accounting)
//! - **[`hash`]**: consistent-hash ring used by peer pickers
//! - **[`singleflight`]**: per-key call coalescing
//! - **[`sink`]**: caller-supplied write targets for loaded values
//! - **[`group`]**: the coordination layer routing get/set/remove
//! - **[`registry`]**: named groups plus transport lifecycle hooks
//! - **[`peers`]**: the transport-facing traits this crate consumes
//!
//! The wire transport, service discovery, and bootstrap wiring live outside
//! this crate: implement [`peers::PeerClient`] and [`peers::PeerPicker`]
//! and hand them to a [`GroupBuilder`] or a registry picker factory.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshcache::{Registry, GroupBuilder, LoaderFn, sink::StringSink};
//! use tokio_util::sync::CancellationToken;
//!
//! let loader = LoaderFn::new(|key| async move {
//!     Ok(format!("value for {key}").into_bytes())
//! });
//! let group = GroupBuilder::new("scores")
//!     .with_cache_bytes(64 << 20)
//!     .with_loader(loader)
//!     .build(Registry::global())?;
//!
//! let ctx = CancellationToken::new();
//! let mut value = String::new();
//! let mut sink = StringSink::new(&mut value);
//! group.get(&ctx, "alice", &mut sink).await?;
//! ```
//!
//! Consistency is best-effort: writes reach the owner plus an optional
//! local mirror, removals broadcast to all peers, and cross-peer visibility
//! otherwise depends on entry expiry.

pub mod byteview;
pub mod cache;
pub mod error;
pub mod group;
pub mod hash;
pub mod peers;
pub mod registry;
pub mod singleflight;
pub mod sink;

pub use byteview::ByteView;
pub use cache::CacheStats;
pub use error::{Error, Result};
pub use group::{CacheKind, Group, GroupBuilder, Loader, LoaderFn, Stats, StatsSnapshot};
pub use registry::Registry;
pub use sink::Sink;
