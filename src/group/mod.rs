//! Cache groups
//!
//! A [`Group`] is a named cache namespace spread across a set of identical
//! peer processes. Every get first consults the two local tiers, then
//! delegates to the key's authoritative owner chosen by consistent hashing:
//! a remote owner is asked over the peer transport, a local owner invokes
//! the user-supplied [`Loader`]. Overlapping work for one key collapses to
//! a single execution per process.
//!
//! ```text
//! get(key) ──▶ main / hot lookup ──hit──▶ sink
//!                  │ miss
//!                  ▼
//!            load flight (one body per key)
//!                  │ re-check, then route
//!         ┌────────┴─────────┐
//!         ▼                  ▼
//!    remote owner       local owner
//!    peer.get()         loader.load()
//!         │                  │
//!         ▼                  ▼
//!     hot cache         main cache
//! ```
//!
//! Data authoritatively owned by this process always lands in the main
//! cache; data owned elsewhere lands in the hot cache. The two are
//! symmetric for lookup and share one byte budget.

mod stats;

pub use stats::{CacheKind, Stats, StatsSnapshot};

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::byteview::ByteView;
use crate::cache::{CacheShard, CacheStats};
use crate::error::{Error, Result};
use crate::peers::{
    expire_from_unix_nanos, expire_to_unix_nanos, GetRequest, NoPeers, PeerClient, PeerPicker,
    RemoveRequest, SetRequest,
};
use crate::registry::{Registry, SharedPickerFactory};
use crate::singleflight::FlightGroup;
use crate::sink::Sink;

/// Produces the authoritative value for a key on a cache miss.
///
/// The returned data must be versionless: the key alone describes it, with
/// no implicit current time and no reliance on cache expiry. Loaders
/// populate `dest` exactly once on success. Returning
/// [`Error::NotFound`] or [`Error::RemoteCall`] marks the miss as terminal
/// for the whole cluster.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, ctx: &CancellationToken, key: &str, dest: &mut dyn Sink) -> Result<()>;
}

/// Adapts a closure into a [`Loader`].
///
/// The closure receives the key and returns the raw value bytes, which the
/// adapter stores into the caller's sink with no expiry. Implement
/// [`Loader`] directly when the loader needs expiry control, string values,
/// or cancellation awareness.
///
/// ```rust,ignore
/// let loader = LoaderFn::new(|key| async move {
///     Ok(format!("value for {key}").into_bytes())
/// });
/// ```
pub struct LoaderFn<F> {
    f: F,
}

impl<F> LoaderFn<F> {
    pub fn new(f: F) -> Self {
        LoaderFn { f }
    }
}

#[async_trait]
impl<F, Fut> Loader for LoaderFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    async fn load(&self, _ctx: &CancellationToken, key: &str, dest: &mut dyn Sink) -> Result<()> {
        let value = (self.f)(key.to_string()).await?;
        dest.set_bytes(&value, None)
    }
}

/// Configures a [`Group`] before registration.
///
/// A loader is required; everything else has defaults. Without an explicit
/// peer picker the group asks its registry's picker factory at first use
/// and falls back to [`NoPeers`].
pub struct GroupBuilder {
    pub(crate) name: String,
    cache_bytes: i64,
    loader: Option<Arc<dyn Loader>>,
    picker: Option<Arc<dyn PeerPicker>>,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        GroupBuilder {
            name: name.into(),
            cache_bytes: 0,
            loader: None,
            picker: None,
        }
    }

    /// Ceiling for the combined byte footprint of both cache tiers. Zero
    /// (the default) disables caching: every get reaches the loader.
    pub fn with_cache_bytes(mut self, cache_bytes: i64) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    /// Set the loader invoked on authoritative cache misses.
    pub fn with_loader<L>(mut self, loader: L) -> Self
    where
        L: Loader + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Set an already-shared loader.
    pub fn with_shared_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Route keys through an explicit peer picker instead of the registry's
    /// factory.
    pub fn with_peer_picker(mut self, picker: Arc<dyn PeerPicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    /// Register the group with `registry` and return it.
    pub fn build(self, registry: &Registry) -> Result<Arc<Group>> {
        registry.register(self)
    }

    pub(crate) fn into_group(self, picker_factory: SharedPickerFactory) -> Result<Group> {
        let loader = self
            .loader
            .ok_or_else(|| Error::Validation("no loader configured".into()))?;
        let picker = OnceLock::new();
        if let Some(explicit) = self.picker {
            let _ = picker.set(explicit);
        }
        Ok(Group {
            name: self.name,
            loader,
            picker,
            picker_factory,
            cache_bytes: self.cache_bytes,
            main_cache: CacheShard::new(),
            hot_cache: CacheShard::new(),
            load_flight: FlightGroup::new(),
            set_flight: FlightGroup::new(),
            remove_flight: FlightGroup::new(),
            stats: Stats::default(),
        })
    }
}

/// A named cache namespace coordinating two local tiers, a loader, and a
/// set of peers.
///
/// All methods are safe to call concurrently. Per key, at most one load,
/// one set, and one remove body run at a time; the three kinds are not
/// ordered against each other.
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    picker: OnceLock<Arc<dyn PeerPicker>>,
    picker_factory: SharedPickerFactory,
    cache_bytes: i64,
    main_cache: CacheShard,
    hot_cache: CacheShard,
    load_flight: FlightGroup<ByteView>,
    set_flight: FlightGroup<()>,
    remove_flight: FlightGroup<()>,
    /// Live counters; the transport layer bumps `server_requests` here when
    /// serving inbound peer traffic.
    pub stats: Stats,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Group {
    /// The group's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statistics for one cache tier.
    pub fn cache_stats(&self, which: CacheKind) -> CacheStats {
        match which {
            CacheKind::Main => self.main_cache.stats(),
            CacheKind::Hot => self.hot_cache.stats(),
        }
    }

    /// Fetch the value for `key` into `dest`, loading it through the owner
    /// peer or the local loader on a miss.
    pub async fn get(&self, ctx: &CancellationToken, key: &str, dest: &mut dyn Sink) -> Result<()> {
        self.stats.gets.fetch_add(1, Ordering::Relaxed);
        if key.is_empty() {
            return Err(Error::Validation("empty get key".into()));
        }

        if let Some(value) = self.lookup_cache(key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return dest.set_view(value);
        }

        let mut dest_populated = false;
        let value = self.load(ctx, key, dest, &mut dest_populated).await?;
        if dest_populated {
            return Ok(());
        }
        dest.set_view(value)
    }

    /// Store `value` under `key` on its owner. A remote owner receives the
    /// write over the transport; `also_hot` additionally mirrors it into
    /// the local hot cache. Concurrent sets for one key coalesce.
    pub async fn set(
        &self,
        ctx: &CancellationToken,
        key: &str,
        value: Vec<u8>,
        expire: Option<SystemTime>,
        also_hot: bool,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Validation("empty set key".into()));
        }
        let value = Bytes::from(value);

        self.set_flight
            .do_call(key, async {
                if let Some(owner) = self.peers().pick_peer(key) {
                    let req = SetRequest {
                        group: self.name.clone(),
                        key: key.to_string(),
                        value: value.to_vec(),
                        expire_unix_nanos: expire_to_unix_nanos(expire),
                    };
                    owner.set(ctx, &req).await?;
                    if also_hot {
                        self.local_set(key, value.clone(), expire, &self.hot_cache);
                    }
                    return Ok(());
                }
                self.local_set(key, value.clone(), expire, &self.main_cache);
                Ok(())
            })
            .await
    }

    /// Purge `key` everywhere: from the owner, from the local tiers, and
    /// then from every other peer concurrently. Concurrent removes for one
    /// key coalesce. Remote effects are best-effort under cancellation.
    pub async fn remove(&self, ctx: &CancellationToken, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Validation("empty remove key".into()));
        }

        self.remove_flight
            .do_call(key, async {
                let req = RemoveRequest {
                    group: self.name.clone(),
                    key: key.to_string(),
                };

                let owner = self.peers().pick_peer(key);
                if let Some(owner) = &owner {
                    owner.remove(ctx, &req).await?;
                }
                self.local_remove(key);

                // Fan the removal out to everyone else and join.
                let owner_url = owner.map(|p| p.url().to_string());
                let mut broadcast = JoinSet::new();
                for peer in self.peers().all_peers() {
                    if owner_url.as_deref() == Some(peer.url()) {
                        continue;
                    }
                    let req = req.clone();
                    let ctx = ctx.clone();
                    broadcast.spawn(async move { peer.remove(&ctx, &req).await });
                }

                // Last error wins, matching the historical aggregation.
                let mut last_err = None;
                while let Some(joined) = broadcast.join_next().await {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::debug!(
                                group = %self.name,
                                key,
                                error = %err,
                                "peer removal failed"
                            );
                            last_err = Some(err);
                        }
                        Err(join_err) => {
                            last_err = Some(Error::Peer(join_err.to_string()));
                        }
                    }
                }
                match last_err {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            })
            .await
    }

    /// The group's peer picker, resolved through the registry's factory on
    /// first use.
    fn peers(&self) -> &Arc<dyn PeerPicker> {
        self.picker.get_or_init(|| {
            let factory = self.picker_factory.read().clone();
            match factory {
                Some(factory) => factory(&self.name),
                None => Arc::new(NoPeers),
            }
        })
    }

    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        if self.cache_bytes <= 0 {
            return None;
        }
        self.main_cache
            .get(key)
            .or_else(|| self.hot_cache.get(key))
    }

    async fn load(
        &self,
        ctx: &CancellationToken,
        key: &str,
        dest: &mut dyn Sink,
        dest_populated: &mut bool,
    ) -> Result<ByteView> {
        self.stats.loads.fetch_add(1, Ordering::Relaxed);

        self.load_flight
            .do_call(key, async {
                // Re-check the caches: the flight only dedups overlapping
                // calls, so a caller serialized behind a finished winner
                // would otherwise load (and double-account) the same key.
                if let Some(value) = self.lookup_cache(key) {
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                self.stats.loads_deduped.fetch_add(1, Ordering::Relaxed);

                if let Some(peer) = self.peers().pick_peer(key) {
                    match self.get_from_peer(ctx, peer.as_ref(), key).await {
                        Ok(value) => {
                            self.stats.peer_loads.fetch_add(1, Ordering::Relaxed);
                            return Ok(value);
                        }
                        Err(err) if err.is_terminal() => return Err(err),
                        Err(err) => {
                            self.stats.peer_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                group = %self.name,
                                key,
                                error = %err,
                                "peer load failed, falling back to local loader"
                            );
                            if ctx.is_cancelled() {
                                return Err(err);
                            }
                        }
                    }
                }

                match self.loader.load(ctx, key, dest).await {
                    Err(err) => {
                        self.stats.local_load_errs.fetch_add(1, Ordering::Relaxed);
                        Err(err)
                    }
                    Ok(()) => {
                        self.stats.local_loads.fetch_add(1, Ordering::Relaxed);
                        let value = dest.view()?;
                        // The winner's sink already holds the value; only
                        // waiters copy the view out.
                        *dest_populated = true;
                        self.populate_cache(key, value.clone(), &self.main_cache);
                        Ok(value)
                    }
                }
            })
            .await
    }

    async fn get_from_peer(
        &self,
        ctx: &CancellationToken,
        peer: &dyn PeerClient,
        key: &str,
    ) -> Result<ByteView> {
        let req = GetRequest {
            group: self.name.clone(),
            key: key.to_string(),
        };

        let start = Instant::now();
        let result = peer.get(ctx, &req).await;
        self.stats
            .get_from_peers_latency_lower
            .fetch_max(start.elapsed().as_millis() as i64, Ordering::Relaxed);
        let res = result?;

        let expire = expire_from_unix_nanos(res.expire_unix_nanos);
        if let Some(t) = expire {
            if SystemTime::now() >= t {
                return Err(Error::Peer("peer returned an expired value".into()));
            }
        }

        let value = ByteView::from_bytes(Bytes::from(res.value), expire);
        self.populate_cache(key, value.clone(), &self.hot_cache);
        Ok(value)
    }

    fn local_set(&self, key: &str, value: Bytes, expire: Option<SystemTime>, cache: &CacheShard) {
        let value = ByteView::from_bytes(value, expire);
        // Hold the load flight's gate so no load is mid-populate on this
        // key while the write lands.
        self.load_flight.lock(|| {
            self.populate_cache(key, value, cache);
        });
    }

    fn local_remove(&self, key: &str) {
        self.load_flight.lock(|| {
            self.hot_cache.remove(key);
            self.main_cache.remove(key);
        });
    }

    fn populate_cache(&self, key: &str, value: ByteView, cache: &CacheShard) {
        if self.cache_bytes <= 0 {
            return;
        }
        cache.add(key.to_string(), value);

        loop {
            let main_bytes = self.main_cache.bytes();
            let hot_bytes = self.hot_cache.bytes();
            if main_bytes + hot_bytes <= self.cache_bytes {
                return;
            }
            // Keep the hot tier a small minority of the budget.
            let victim = if hot_bytes > main_bytes / 8 {
                &self.hot_cache
            } else {
                &self.main_cache
            };
            victim.remove_oldest();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::GetResponse;
    use crate::sink::StringSink;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Loader that records invocations and serves a fixed string.
    struct CountingLoader {
        value: String,
        delay: Duration,
        error: Option<Error>,
        calls: AtomicUsize,
    }

    impl CountingLoader {
        fn serving(value: &str) -> Arc<Self> {
            Arc::new(CountingLoader {
                value: value.to_string(),
                delay: Duration::ZERO,
                error: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(value: &str, delay: Duration) -> Arc<Self> {
            Arc::new(CountingLoader {
                value: value.to_string(),
                delay,
                error: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(error: Error) -> Arc<Self> {
            Arc::new(CountingLoader {
                value: String::new(),
                delay: Duration::ZERO,
                error: Some(error),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Loader for CountingLoader {
        async fn load(
            &self,
            _ctx: &CancellationToken,
            _key: &str,
            dest: &mut dyn Sink,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            dest.set_string(self.value.clone(), None)
        }
    }

    /// In-process peer recording calls and serving canned responses.
    struct FakePeer {
        url: String,
        value: Option<Vec<u8>>,
        expire_nanos: i64,
        get_error: Option<Error>,
        cancel_on_get: bool,
        remove_delay: Duration,
        get_calls: AtomicUsize,
        set_calls: AtomicUsize,
        remove_calls: AtomicUsize,
        last_set: Mutex<Option<SetRequest>>,
    }

    impl FakePeer {
        fn new(url: &str) -> FakePeer {
            FakePeer {
                url: url.to_string(),
                value: None,
                expire_nanos: 0,
                get_error: None,
                cancel_on_get: false,
                remove_delay: Duration::ZERO,
                get_calls: AtomicUsize::new(0),
                set_calls: AtomicUsize::new(0),
                remove_calls: AtomicUsize::new(0),
                last_set: Mutex::new(None),
            }
        }

        fn serving(url: &str, value: &[u8]) -> Arc<FakePeer> {
            let mut peer = FakePeer::new(url);
            peer.value = Some(value.to_vec());
            Arc::new(peer)
        }

        fn failing(url: &str, error: Error) -> Arc<FakePeer> {
            let mut peer = FakePeer::new(url);
            peer.get_error = Some(error);
            Arc::new(peer)
        }
    }

    #[async_trait]
    impl PeerClient for FakePeer {
        async fn get(&self, ctx: &CancellationToken, req: &GetRequest) -> Result<GetResponse> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_on_get {
                ctx.cancel();
            }
            if let Some(err) = &self.get_error {
                return Err(err.clone());
            }
            match &self.value {
                Some(value) => Ok(GetResponse {
                    value: value.clone(),
                    expire_unix_nanos: self.expire_nanos,
                }),
                None => Err(Error::NotFound(req.key.clone())),
            }
        }

        async fn set(&self, _ctx: &CancellationToken, req: &SetRequest) -> Result<()> {
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_set.lock() = Some(req.clone());
            Ok(())
        }

        async fn remove(&self, _ctx: &CancellationToken, _req: &RemoveRequest) -> Result<()> {
            self.remove_calls.fetch_add(1, Ordering::SeqCst);
            if !self.remove_delay.is_zero() {
                tokio::time::sleep(self.remove_delay).await;
            }
            Ok(())
        }

        fn url(&self) -> &str {
            &self.url
        }
    }

    /// Picker routing every key to one fixed owner (or locally when none).
    struct StaticPicker {
        owner: Option<Arc<FakePeer>>,
        peers: Vec<Arc<FakePeer>>,
    }

    impl PeerPicker for StaticPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerClient>> {
            self.owner
                .as_ref()
                .map(|p| Arc::clone(p) as Arc<dyn PeerClient>)
        }

        fn all_peers(&self) -> Vec<Arc<dyn PeerClient>> {
            self.peers
                .iter()
                .map(|p| Arc::clone(p) as Arc<dyn PeerClient>)
                .collect()
        }
    }

    fn build_group(
        name: &str,
        cache_bytes: i64,
        loader: Arc<CountingLoader>,
        picker: Option<StaticPicker>,
    ) -> Arc<Group> {
        let registry = Registry::new();
        let mut builder = GroupBuilder::new(name)
            .with_cache_bytes(cache_bytes)
            .with_shared_loader(loader);
        if let Some(picker) = picker {
            builder = builder.with_peer_picker(Arc::new(picker));
        }
        builder.build(&registry).unwrap()
    }

    async fn get_string(group: &Group, key: &str) -> Result<String> {
        let ctx = CancellationToken::new();
        let mut out = String::new();
        let mut sink = StringSink::new(&mut out);
        group.get(&ctx, key, &mut sink).await?;
        drop(sink);
        Ok(out)
    }

    #[tokio::test]
    async fn test_local_hit() {
        let loader = CountingLoader::serving("unused");
        let group = build_group("hits", 1 << 20, Arc::clone(&loader), None);
        let ctx = CancellationToken::new();

        group
            .set(&ctx, "foo", b"bar".to_vec(), None, false)
            .await
            .unwrap();

        let (first, second) = tokio::join!(get_string(&group, "foo"), get_string(&group, "foo"));
        assert_eq!(first.unwrap(), "bar");
        assert_eq!(second.unwrap(), "bar");

        let snap = group.stats.snapshot();
        assert_eq!(snap.gets, 2);
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_reaches_loader_and_populates_main() {
        let loader = CountingLoader::serving("loaded");
        let group = build_group("misses", 1 << 20, Arc::clone(&loader), None);

        assert_eq!(get_string(&group, "k").await.unwrap(), "loaded");
        assert_eq!(loader.calls(), 1);
        assert_eq!(group.cache_stats(CacheKind::Main).items, 1);
        assert_eq!(group.cache_stats(CacheKind::Hot).items, 0);

        // Second get is a cache hit.
        assert_eq!(get_string(&group, "k").await.unwrap(), "loaded");
        assert_eq!(loader.calls(), 1);

        let snap = group.stats.snapshot();
        assert_eq!(snap.loads, 1);
        assert_eq!(snap.loads_deduped, 1);
        assert_eq!(snap.local_loads, 1);
        assert_eq!(snap.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_remote_miss_with_peer_success() {
        let owner = FakePeer::serving("peer-b:8080", b"v1");
        let loader = CountingLoader::serving("unused");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner)],
        };
        let group = build_group("remote", 1 << 20, Arc::clone(&loader), Some(picker));

        assert_eq!(get_string(&group, "k1").await.unwrap(), "v1");

        assert_eq!(owner.get_calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.calls(), 0);
        let snap = group.stats.snapshot();
        assert_eq!(snap.peer_loads, 1);
        assert_eq!(snap.peer_errors, 0);

        // The mirrored value lives in the hot tier only.
        let hot = group.cache_stats(CacheKind::Hot);
        assert_eq!(hot.items, 1);
        assert_eq!(group.cache_stats(CacheKind::Main).items, 0);

        // Served locally from now on.
        assert_eq!(get_string(&group, "k1").await.unwrap(), "v1");
        assert_eq!(owner.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_gets_coalesce_to_one_load() {
        let loader = CountingLoader::slow("v2", Duration::from_millis(200));
        let group = build_group("coalesce", 1 << 20, Arc::clone(&loader), None);

        let mut tasks = JoinSet::new();
        for _ in 0..100 {
            let group = Arc::clone(&group);
            tasks.spawn(async move { get_string(&group, "k2").await });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), "v2");
        }

        assert_eq!(loader.calls(), 1);
        let snap = group.stats.snapshot();
        assert_eq!(snap.gets, 100);
        assert_eq!(snap.loads, 100);
        assert_eq!(snap.loads_deduped, 1);
        assert_eq!(snap.local_loads, 1);
    }

    #[tokio::test]
    async fn test_eviction_pressure_keeps_budget() {
        let loader = CountingLoader::serving("unused");
        let group = build_group("pressure", 20, Arc::clone(&loader), None);
        let ctx = CancellationToken::new();

        // 22 one-byte keys with empty values: one byte of accounting each.
        for c in b'a'..=b'v' {
            let key = (c as char).to_string();
            group.set(&ctx, &key, Vec::new(), None, false).await.unwrap();
        }

        let main = group.cache_stats(CacheKind::Main);
        assert_eq!(main.bytes, 20);
        assert_eq!(main.items, 20);
        assert_eq!(main.evictions, 2);

        // The two oldest keys were evicted first; the rest still hit.
        for key in ["a", "b"] {
            assert_eq!(group.lookup_cache(key), None, "key {key}");
        }
        for key in ["c", "v"] {
            assert!(group.lookup_cache(key).is_some(), "key {key}");
        }
    }

    #[tokio::test]
    async fn test_expired_entry_reloads() {
        let loader = CountingLoader::serving("fresh");
        let group = build_group("expiry", 1 << 20, Arc::clone(&loader), None);
        let ctx = CancellationToken::new();

        let expire = SystemTime::now() + Duration::from_millis(100);
        group
            .set(&ctx, "k", b"v".to_vec(), Some(expire), false)
            .await
            .unwrap();

        assert_eq!(get_string(&group, "k").await.unwrap(), "v");
        assert_eq!(loader.calls(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(get_string(&group, "k").await.unwrap(), "fresh");
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_broadcasts_once_per_peer() {
        let mut owner = FakePeer::new("peer-a:8080");
        owner.remove_delay = Duration::from_millis(50);
        let owner = Arc::new(owner);
        let mut other = FakePeer::new("peer-c:8080");
        other.remove_delay = Duration::from_millis(50);
        let other = Arc::new(other);

        let loader = CountingLoader::serving("unused");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner), Arc::clone(&other)],
        };
        let group = build_group("removal", 1 << 20, loader, Some(picker));
        let ctx = CancellationToken::new();

        // Seed the local hot tier through a remote set.
        group
            .set(&ctx, "k", b"v".to_vec(), None, true)
            .await
            .unwrap();
        assert_eq!(owner.set_calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.cache_stats(CacheKind::Hot).items, 1);

        let mut removers = JoinSet::new();
        for _ in 0..10 {
            let group = Arc::clone(&group);
            let ctx = ctx.clone();
            removers.spawn(async move { group.remove(&ctx, "k").await });
        }
        while let Some(joined) = removers.join_next().await {
            joined.unwrap().unwrap();
        }

        // One coalesced removal: the owner directly, the other peer via
        // broadcast, the owner never twice.
        assert_eq!(owner.remove_calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.remove_calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.cache_stats(CacheKind::Hot).items, 0);
        assert_eq!(group.cache_stats(CacheKind::Main).items, 0);
    }

    #[tokio::test]
    async fn test_set_then_remove_then_get_reloads() {
        let loader = CountingLoader::serving("reloaded");
        let group = build_group("cycle", 1 << 20, Arc::clone(&loader), None);
        let ctx = CancellationToken::new();

        group
            .set(&ctx, "k", b"v".to_vec(), None, false)
            .await
            .unwrap();
        group.remove(&ctx, "k").await.unwrap();

        assert_eq!(get_string(&group, "k").await.unwrap(), "reloaded");
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_set_mirrors_hot_cache_on_request() {
        let owner = FakePeer::serving("peer-a:8080", b"ignored");
        let loader = CountingLoader::serving("unused");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner)],
        };
        let group = build_group("remote-set", 1 << 20, loader, Some(picker));
        let ctx = CancellationToken::new();

        group
            .set(&ctx, "k", b"v".to_vec(), None, false)
            .await
            .unwrap();
        assert_eq!(owner.set_calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.cache_stats(CacheKind::Hot).items, 0);

        group
            .set(&ctx, "k2", b"v2".to_vec(), None, true)
            .await
            .unwrap();
        assert_eq!(group.cache_stats(CacheKind::Hot).items, 1);

        let sent = owner.last_set.lock().clone().unwrap();
        assert_eq!(sent.group, "remote-set");
        assert_eq!(sent.key, "k2");
        assert_eq!(sent.value, b"v2");
        assert_eq!(sent.expire_unix_nanos, 0);
    }

    #[tokio::test]
    async fn test_not_found_from_peer_is_terminal() {
        let owner = FakePeer::failing("peer-a:8080", Error::NotFound("k".into()));
        let loader = CountingLoader::serving("unused");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner)],
        };
        let group = build_group("terminal", 1 << 20, Arc::clone(&loader), Some(picker));

        let err = get_string(&group, "k").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(loader.calls(), 0);
        assert_eq!(group.stats.snapshot().peer_errors, 0);
    }

    #[tokio::test]
    async fn test_remote_call_error_is_terminal() {
        let owner = FakePeer::failing("peer-a:8080", Error::RemoteCall("loader blew up".into()));
        let loader = CountingLoader::serving("unused");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner)],
        };
        let group = build_group("terminal-remote", 1 << 20, Arc::clone(&loader), Some(picker));

        let err = get_string(&group, "k").await.unwrap_err();
        assert!(matches!(err, Error::RemoteCall(_)));
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_peer_error_falls_back_to_loader() {
        let owner = FakePeer::failing("peer-a:8080", Error::Peer("connection reset".into()));
        let loader = CountingLoader::serving("local-v");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner)],
        };
        let group = build_group("fallback", 1 << 20, Arc::clone(&loader), Some(picker));

        assert_eq!(get_string(&group, "k").await.unwrap(), "local-v");
        assert_eq!(loader.calls(), 1);

        let snap = group.stats.snapshot();
        assert_eq!(snap.peer_errors, 1);
        assert_eq!(snap.local_loads, 1);
        // The fallback value is authoritative here, so it lands in main.
        assert_eq!(group.cache_stats(CacheKind::Main).items, 1);
    }

    #[tokio::test]
    async fn test_no_fallback_after_cancellation() {
        let mut owner = FakePeer::new("peer-a:8080");
        owner.get_error = Some(Error::Peer("connection reset".into()));
        owner.cancel_on_get = true;
        let owner = Arc::new(owner);
        let loader = CountingLoader::serving("unused");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner)],
        };
        let group = build_group("cancelled", 1 << 20, Arc::clone(&loader), Some(picker));

        let err = get_string(&group, "k").await.unwrap_err();
        assert!(matches!(err, Error::Peer(_)));
        assert_eq!(loader.calls(), 0);
        assert_eq!(group.stats.snapshot().peer_errors, 1);
    }

    #[tokio::test]
    async fn test_expired_peer_value_is_a_load_failure() {
        let mut owner = FakePeer::new("peer-a:8080");
        owner.value = Some(b"stale".to_vec());
        owner.expire_nanos = 1; // long past
        let owner = Arc::new(owner);
        let loader = CountingLoader::serving("fresh");
        let picker = StaticPicker {
            owner: Some(Arc::clone(&owner)),
            peers: vec![Arc::clone(&owner)],
        };
        let group = build_group("stale-peer", 1 << 20, Arc::clone(&loader), Some(picker));

        // The stale response is discarded and the local loader answers.
        assert_eq!(get_string(&group, "k").await.unwrap(), "fresh");
        assert_eq!(group.stats.snapshot().peer_errors, 1);
        assert_eq!(group.cache_stats(CacheKind::Hot).items, 0);
    }

    #[tokio::test]
    async fn test_zero_cache_bytes_disables_caching() {
        let loader = CountingLoader::serving("v");
        let group = build_group("uncached", 0, Arc::clone(&loader), None);

        for _ in 0..3 {
            assert_eq!(get_string(&group, "k").await.unwrap(), "v");
        }

        assert_eq!(loader.calls(), 3);
        assert_eq!(group.cache_stats(CacheKind::Main).items, 0);
        let snap = group.stats.snapshot();
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.loads, 3);
        assert_eq!(snap.loads_deduped, 3);
    }

    #[tokio::test]
    async fn test_loader_error_surfaces_and_counts() {
        let loader = CountingLoader::failing(Error::NotFound("nothing here".into()));
        let group = build_group("loader-errs", 1 << 20, Arc::clone(&loader), None);

        let err = get_string(&group, "k").await.unwrap_err();
        assert_eq!(err, Error::NotFound("nothing here".into()));
        assert_eq!(group.stats.snapshot().local_load_errs, 1);
        assert_eq!(group.cache_stats(CacheKind::Main).items, 0);
    }

    #[tokio::test]
    async fn test_empty_keys_are_rejected() {
        let loader = CountingLoader::serving("v");
        let group = build_group("validate", 1 << 20, loader, None);
        let ctx = CancellationToken::new();

        assert!(matches!(
            get_string(&group, "").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            group.set(&ctx, "", b"v".to_vec(), None, false).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            group.remove(&ctx, "").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_builder_requires_loader() {
        let registry = Registry::new();
        let err = GroupBuilder::new("no-loader")
            .with_cache_bytes(1024)
            .build(&registry)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_name_and_cache_stats() {
        let loader = CountingLoader::serving("v");
        let group = build_group("named", 1 << 20, loader, None);
        assert_eq!(group.name(), "named");
        assert_eq!(group.cache_stats(CacheKind::Main), CacheStats::default());
        assert_eq!(group.cache_stats(CacheKind::Hot), CacheStats::default());
    }
}
