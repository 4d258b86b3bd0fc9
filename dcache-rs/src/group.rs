//! Provides cache groups, the central entry point of the cache.
//!
//! A [Group](Group) is a named namespace of keys which is backed by a bounded
//! [Cache](crate::cache::Cache) and a [Getter](Getter) which loads values from the backing store
//! of the application. Groups are created and looked up via a [Registry](Registry).
//!
//! # Loading values
//!
//! [Group::get](Group::get) first consults the local cache. On a miss, all concurrent callers
//! for the same key are coalesced into a single load, which:
//! 1. invokes the local getter. If this yields a value, the value is stored in the cache and
//!    pushed to all other owners of the key (see **Replication** below).
//! 2. otherwise asks the owners of the key (as determined by the attached
//!    [PeerPicker](crate::peers::PeerPicker)) one after another. The first value being returned
//!    wins. Note that values served by a peer are not cached locally, as they are owned (and
//!    cached) by the peer.
//! 3. otherwise reports the error of the local getter.
//!
//! Values which are larger than the whole cache are returned to the caller but never stored.
//!
//! Requests sent by other nodes are served via [Group::get_locally](Group::get_locally), which
//! never contacts any further peer. Otherwise two nodes which both miss a key could end up
//! waiting for each other.
//!
//! # Replication
//!
//! Once a value has been loaded locally, it is pushed to all other owners of its key. Each push
//! runs in a detached task, the caller never waits for it. Failed pushes are neither retried nor
//! reported to the caller. They are logged, counted in the [GroupStats](GroupStats) and handed
//! to the replication hook (if one is installed).
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use dcache::group::{GetterFunc, Registry};
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new();
//! let scores = registry.new_group(
//!     "scores",
//!     2 << 10,
//!     Arc::new(GetterFunc(|key: &str| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not exist", key)),
//!     })),
//! );
//!
//! assert_eq!(scores.get("Tom").await.unwrap().to_string(), "630");
//! assert_eq!(scores.get("Jack").await.unwrap_err().is_not_found(), true);
//! assert_eq!(scores.get("").await.is_err(), true);
//! # }
//! ```
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::byteview::ByteView;
use crate::cache::{Cache, CacheStats};
use crate::error::{CacheError, CacheResult};
use crate::peers::{GetRequest, PeerClient, PeerPicker, SetRequest};
use crate::singleflight::SingleFlight;
use crate::spawn;

/// Loads values from the backing store of the application.
///
/// Any error is treated as "not found or unavailable" and is not distinguished any further.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Loads the value for the given key.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain (non async) function to be used as [Getter](Getter).
pub struct GetterFunc<F>(pub F);

#[async_trait]
impl<F> Getter for GetterFunc<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key)
    }
}

/// Describes a replication push which failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationFailure {
    /// Contains the name of the group.
    pub group: String,
    /// Contains the key which was pushed.
    pub key: String,
    /// Contains the address of the peer which was targeted.
    pub peer: String,
    /// Contains the error reported by the peer.
    pub error: CacheError,
}

/// Represents the hook which is notified about failed replication pushes.
pub type ReplicationHook = Box<dyn Fn(&ReplicationFailure) + Send + Sync>;

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    cache_hits: AtomicU64,
    peer_requests: AtomicU64,
    local_loads: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    oversized: AtomicU64,
    replications: AtomicU64,
    replication_failures: AtomicU64,
}

impl Counters {
    fn increment(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Provides a snapshot of the metrics of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    /// Contains the number of calls to **get**.
    pub gets: u64,
    /// Contains the number of lookups which were served by the local cache.
    pub cache_hits: u64,
    /// Contains the number of requests received from other nodes.
    pub peer_requests: u64,
    /// Contains the number of values loaded by the local getter.
    pub local_loads: u64,
    /// Contains the number of values fetched from other nodes.
    pub peer_loads: u64,
    /// Contains the number of failed fetches (other than "not found") from other nodes.
    pub peer_errors: u64,
    /// Contains the number of values which were too large to be cached.
    pub oversized: u64,
    /// Contains the number of successful replication pushes.
    pub replications: u64,
    /// Contains the number of failed replication pushes.
    pub replication_failures: u64,
    /// Contains the metrics of the underlying cache.
    pub cache: CacheStats,
}

/// Represents a named cache namespace.
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    cache: Cache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: SingleFlight<CacheResult<ByteView>>,
    local_flight: SingleFlight<CacheResult<ByteView>>,
    replication_hook: ArcSwapOption<ReplicationHook>,
    counters: Arc<Counters>,
}

impl Group {
    fn new(name: &str, max_memory: usize, getter: Arc<dyn Getter>) -> Self {
        Group {
            name: name.to_owned(),
            getter,
            cache: Cache::new(max_memory),
            peers: OnceLock::new(),
            flight: SingleFlight::new(),
            local_flight: SingleFlight::new(),
            replication_hook: ArcSwapOption::empty(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Returns the name of the group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches the picker used to determine the owners of a key.
    ///
    /// # Panics
    /// Panics if a picker has already been attached to this group.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!("Peers have already been registered for group {}!", self.name);
        }
    }

    /// Installs a hook which is notified about each failed replication push.
    pub fn set_replication_hook<F>(&self, hook: F)
    where
        F: Fn(&ReplicationFailure) + Send + Sync + 'static,
    {
        let hook: ReplicationHook = Box::new(hook);
        self.replication_hook.store(Some(Arc::new(hook)));
    }

    /// Fetches the value for the given key.
    ///
    /// # Errors
    /// Fails with **InvalidArgument** for an empty key. If neither the cache, the getter nor any
    /// of the owning peers can provide a value, the error reported by the getter is returned.
    pub async fn get(&self, key: &str) -> CacheResult<ByteView> {
        Counters::increment(&self.counters.gets);
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("A key is required".to_owned()));
        }

        if let Some(value) = self.cache.get(key) {
            Counters::increment(&self.counters.cache_hits);
            log::debug!("Cache hit for {} in group {}", key, self.name);
            return Ok(value);
        }

        self.flight.run(key, || self.load(key)).await
    }

    /// Fetches the value for the given key without asking any other node.
    ///
    /// This is used to serve requests of other nodes.
    pub async fn get_locally(&self, key: &str) -> CacheResult<ByteView> {
        Counters::increment(&self.counters.peer_requests);
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("A key is required".to_owned()));
        }

        if let Some(value) = self.cache.get(key) {
            Counters::increment(&self.counters.cache_hits);
            return Ok(value);
        }

        self.load_locally(key).await
    }

    /// Stores a value which has been pushed by another node.
    ///
    /// # Errors
    /// Fails with **InvalidArgument** for an empty key or with **CapacityExceeded** if the value
    /// is larger than the whole cache.
    pub fn accept_replica(&self, key: &str, value: ByteView) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("A key is required".to_owned()));
        }

        log::debug!("Storing replica of {} in group {}", key, self.name);
        self.cache.add(key, value).map_err(|error| {
            Counters::increment(&self.counters.oversized);
            log::warn!("Rejected replica of {} in group {}: {}", key, self.name, error);
            error
        })
    }

    async fn load(&self, key: &str) -> CacheResult<ByteView> {
        let local_error = match self.load_locally(key).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if let Some(peers) = self.peers.get() {
            let mut contacted = None;
            if let Some(peer) = peers.pick_peer(key) {
                if let Some(value) = self.load_from_peer(&peer, key).await {
                    return Ok(value);
                }
                contacted = Some(peer.address().to_owned());
            }

            for peer in peers.pick_replicas(key) {
                if contacted.as_deref() == Some(peer.address()) {
                    continue;
                }
                if let Some(value) = self.load_from_peer(&peer, key).await {
                    return Ok(value);
                }
            }
        }

        Err(local_error)
    }

    async fn load_locally(&self, key: &str) -> CacheResult<ByteView> {
        self.local_flight
            .run(key, || async {
                let value = match self.getter.get(key).await {
                    Ok(data) => ByteView::from(data),
                    Err(error) => {
                        log::debug!(
                            "Failed to load {} for group {} locally: {:#}",
                            key,
                            self.name,
                            error
                        );
                        return Err(CacheError::NotFound(format!("{}: {:#}", key, error)));
                    }
                };

                Counters::increment(&self.counters.local_loads);
                if self.populate_cache(key, value.clone()) {
                    self.replicate(key, &value);
                }

                Ok(value)
            })
            .await
    }

    async fn load_from_peer(&self, peer: &Arc<dyn PeerClient>, key: &str) -> Option<ByteView> {
        let request = GetRequest {
            group: self.name.clone(),
            key: key.to_owned(),
        };

        match peer.get(&request).await {
            Ok(response) => {
                Counters::increment(&self.counters.peer_loads);
                log::debug!(
                    "Fetched {} for group {} from {}",
                    key,
                    self.name,
                    peer.address()
                );
                Some(ByteView::from(response.value))
            }
            Err(error) if error.is_not_found() => {
                log::debug!("{} doesn't know {} either: {}", peer.address(), key, error);
                None
            }
            Err(error) => {
                Counters::increment(&self.counters.peer_errors);
                log::warn!(
                    "Failed to fetch {} for group {} from {}: {}",
                    key,
                    self.name,
                    peer.address(),
                    error
                );
                None
            }
        }
    }

    /// Stores a freshly loaded value and reports whether it fit into the cache.
    fn populate_cache(&self, key: &str, value: ByteView) -> bool {
        match self.cache.add(key, value) {
            Ok(()) => true,
            Err(error) => {
                Counters::increment(&self.counters.oversized);
                log::warn!("Not caching {} in group {}: {}", key, self.name, error);
                false
            }
        }
    }

    fn replicate(&self, key: &str, value: &ByteView) {
        let peers = match self.peers.get() {
            Some(peers) => peers.pick_replicas(key),
            None => return,
        };
        if peers.is_empty() {
            return;
        }

        let request = Arc::new(SetRequest {
            group: self.name.clone(),
            key: key.to_owned(),
            value: value.to_vec(),
        });

        for peer in peers {
            let request = request.clone();
            let counters = self.counters.clone();
            let hook = self.replication_hook.load_full();
            spawn!(async move {
                match peer.set(&request).await {
                    Ok(()) => {
                        Counters::increment(&counters.replications);
                        log::debug!(
                            "Replicated {} of group {} to {}",
                            request.key,
                            request.group,
                            peer.address()
                        );
                    }
                    Err(error) => {
                        Counters::increment(&counters.replication_failures);
                        log::warn!(
                            "Failed to replicate {} of group {} to {}: {}",
                            request.key,
                            request.group,
                            peer.address(),
                            error
                        );
                        if let Some(hook) = hook {
                            hook(&ReplicationFailure {
                                group: request.group.clone(),
                                key: request.key.clone(),
                                peer: peer.address().to_owned(),
                                error,
                            });
                        }
                    }
                }
            });
        }
    }

    /// Returns the configured capacity of the cache in bytes.
    pub fn max_memory(&self) -> usize {
        self.cache.max_memory()
    }

    /// Obtains a snapshot of the metrics of this group.
    pub fn stats(&self) -> GroupStats {
        let counters = &self.counters;
        GroupStats {
            gets: counters.gets.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            peer_requests: counters.peer_requests.load(Ordering::Relaxed),
            local_loads: counters.local_loads.load(Ordering::Relaxed),
            peer_loads: counters.peer_loads.load(Ordering::Relaxed),
            peer_errors: counters.peer_errors.load(Ordering::Relaxed),
            oversized: counters.oversized.load(Ordering::Relaxed),
            replications: counters.replications.load(Ordering::Relaxed),
            replication_failures: counters.replication_failures.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }
}

/// Keeps all groups of a node by name.
///
/// Most probably a single registry is created by the [Builder](crate::builder::Builder) and can
/// be obtained via `platform.require::<Registry>()`.
#[derive(Default)]
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Registry::default())
    }

    /// Creates and registers a new group.
    ///
    /// A **max_memory** of 0 creates a group with an unbounded cache.
    ///
    /// # Panics
    /// Panics if the name is empty or if a group with the same name is already present.
    pub fn new_group(&self, name: &str, max_memory: usize, getter: Arc<dyn Getter>) -> Arc<Group> {
        if name.is_empty() {
            panic!("A group requires a non-empty name!");
        }

        let mut groups = self.groups.write().unwrap();
        if groups.contains_key(name) {
            panic!("A group named {} has already been registered!", name);
        }

        let group = Arc::new(Group::new(name, max_memory, getter));
        let _ = groups.insert(name.to_owned(), group.clone());
        log::info!(
            "Created group {} with a capacity of {}",
            name,
            crate::fmt::format_size(max_memory)
        );

        group
    }

    /// Looks up the group with the given name.
    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(name).cloned()
    }

    /// Returns all groups sorted by name.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut result: Vec<Arc<Group>> = self.groups.read().unwrap().values().cloned().collect();
        result.sort_by(|left, right| left.name.cmp(&right.name));
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::consistenthash::Ring;
    use crate::error::{CacheError, CacheResult};
    use crate::group::{Getter, GetterFunc, Group, ReplicationFailure, Registry};
    use crate::peers::{
        GetRequest, GetResponse, InProcessPeer, PeerClient, PeerPicker, PeerPool, SetRequest,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Serves a fixed set of values and counts how often it has been asked.
    struct CountingGetter {
        values: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    impl CountingGetter {
        fn new(values: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(CountingGetter {
                values: values
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.as_bytes().to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Getter for CountingGetter {
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.values
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
        }
    }

    struct BrokenPeer;

    #[async_trait]
    impl PeerClient for BrokenPeer {
        fn address(&self) -> &str {
            "broken"
        }

        async fn get(&self, _request: &GetRequest) -> CacheResult<GetResponse> {
            Err(CacheError::PeerUnavailable("connection refused".to_owned()))
        }

        async fn set(&self, _request: &SetRequest) -> CacheResult<()> {
            Err(CacheError::PeerUnavailable("connection refused".to_owned()))
        }
    }

    fn broken_peer() -> Arc<dyn PeerClient> {
        Arc::new(BrokenPeer)
    }

    struct FixedPicker(Vec<Arc<dyn PeerClient>>);

    impl PeerPicker for FixedPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerClient>> {
            self.0.first().cloned()
        }

        fn pick_replicas(&self, _key: &str) -> Vec<Arc<dyn PeerClient>> {
            self.0.clone()
        }
    }

    /// Lets detached replication tasks run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    struct Node {
        registry: Arc<Registry>,
        group: Arc<Group>,
        getter: Arc<CountingGetter>,
    }

    /// Sets up a cluster of in-process nodes, each serving one group named "scores".
    ///
    /// The backing store of each node is given as (node, key, value) triples.
    fn cluster(ids: &[&str], values: &[(&str, &str, &str)]) -> HashMap<String, Node> {
        let mut result = HashMap::new();
        for id in ids {
            let registry = Registry::new();
            let getter = CountingGetter::new(
                &values
                    .iter()
                    .filter(|(node, _, _)| node == id)
                    .map(|(_, key, value)| (*key, *value))
                    .collect::<Vec<_>>(),
            );
            let group = registry.new_group("scores", 1024, getter.clone());
            let _ = result.insert(
                id.to_string(),
                Node {
                    registry,
                    group,
                    getter,
                },
            );
        }

        for id in ids {
            let pool = Arc::new(PeerPool::new(id, 100, 3));
            pool.set_peers(ids, |peer| {
                Arc::new(InProcessPeer::new(peer, &result[peer].registry))
            });
            result[*id].group.register_peers(pool);
        }

        result
    }

    /// Determines the primary owner of a key and another node which isn't.
    fn owner_and_requester(key: &str) -> (&'static str, &'static str) {
        let mut ring = Ring::new(100);
        ring.add(NODES);
        let owner = NODES
            .into_iter()
            .find(|id| Some(*id) == ring.get(key))
            .unwrap();
        let requester = NODES.into_iter().find(|id| *id != owner).unwrap();

        (owner, requester)
    }

    const NODES: [&str; 3] = ["a", "b", "c"];

    #[test]
    fn values_are_loaded_once_and_then_cached() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let getter = CountingGetter::new(&[("A", "1")]);
            let group = registry.new_group("test", 1024, getter.clone());

            assert_eq!(group.get("A").await, Ok(ByteView::from("1")));
            assert_eq!(getter.calls(), 1);

            assert_eq!(group.get("A").await, Ok(ByteView::from("1")));
            assert_eq!(getter.calls(), 1);

            let stats = group.stats();
            assert_eq!(stats.gets, 2);
            assert_eq!(stats.cache_hits, 1);
            assert_eq!(stats.local_loads, 1);
            assert_eq!(stats.cache.entries, 1);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let getter = CountingGetter::new(&[("", "never")]);
            let group = registry.new_group("test", 1024, getter.clone());

            assert_eq!(
                group.get("").await,
                Err(CacheError::InvalidArgument("A key is required".to_owned()))
            );
            assert_eq!(group.get_locally("").await.is_err(), true);
            assert_eq!(getter.calls(), 0);
        });
    }

    #[test]
    fn oversized_values_are_returned_but_not_cached() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let large = "x".repeat(2000);
            let getter = CountingGetter::new(&[("large", large.as_str())]);
            let group = registry.new_group("test", 1024, getter.clone());

            assert_eq!(group.get("large").await.unwrap().len(), 2000);
            assert_eq!(group.get("large").await.unwrap().len(), 2000);
            assert_eq!(getter.calls(), 2);
            assert_eq!(group.stats().oversized, 2);
            assert_eq!(group.stats().cache.entries, 0);
        });
    }

    #[test]
    fn missing_values_are_reported_as_not_found() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let group = registry.new_group(
                "test",
                1024,
                Arc::new(GetterFunc(|key: &str| {
                    Err(anyhow::anyhow!("{} not exist", key))
                })),
            );

            assert_eq!(
                group.get("Jack").await,
                Err(CacheError::NotFound("Jack: Jack not exist".to_owned()))
            );
        });
    }

    #[test]
    fn concurrent_misses_are_coalesced() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let getter = CountingGetter::new(&[("Tom", "630")]);
            let group = registry.new_group("test", 1024, getter.clone());

            let results = futures::future::join_all((0..10).map(|_| group.get("Tom"))).await;

            assert_eq!(getter.calls(), 1);
            for result in results {
                assert_eq!(result, Ok(ByteView::from("630")));
            }
        });
    }

    #[test]
    fn misses_are_forwarded_to_the_owner() {
        crate::testing::test_async(async {
            let nodes = cluster(&NODES, &[]);
            let (owner, requester) = owner_and_requester("X");

            assert_eq!(
                nodes[requester].group.get("X").await.unwrap_err().is_not_found(),
                true
            );

            // The owner has been asked (and in turn asked its own backing store, but no other
            // node)...
            assert_eq!(nodes[requester].getter.calls(), 1);
            assert_eq!(nodes[owner].getter.calls(), 1);
            assert_eq!(nodes[owner].group.stats().peer_requests, 1);
            assert_eq!(nodes[owner].group.stats().gets, 0);
        });
    }

    #[test]
    fn peer_served_values_are_cached_by_their_owner() {
        crate::testing::test_async(async {
            let (owner, requester) = owner_and_requester("X");
            let nodes = cluster(&NODES, &[(owner, "X", "42")]);

            assert_eq!(
                nodes[requester].group.get("X").await,
                Ok(ByteView::from("42"))
            );
            assert_eq!(nodes[requester].group.stats().peer_loads, 1);
            assert_eq!(nodes[requester].group.stats().local_loads, 0);

            // The owner loaded the value itself, therefore it cached and replicated it...
            settle().await;
            assert_eq!(nodes[owner].getter.calls(), 1);
            assert_eq!(nodes[owner].group.stats().cache.entries, 1);
            assert_eq!(nodes[owner].group.stats().replications, 2);

            // As the requester is one of the replicas, it now has a copy...
            assert_eq!(
                nodes[requester].group.get("X").await,
                Ok(ByteView::from("42"))
            );
            assert_eq!(nodes[requester].group.stats().cache_hits, 1);
        });
    }

    #[test]
    fn locally_loaded_values_are_replicated() {
        crate::testing::test_async(async {
            let nodes = cluster(&NODES, &[("a", "Tom", "630")]);

            assert_eq!(nodes["a"].group.get("Tom").await, Ok(ByteView::from("630")));
            settle().await;

            // With three nodes and a replication factor of 3, everyone owns every key...
            assert_eq!(nodes["a"].group.stats().replications, 2);
            for id in ["b", "c"] {
                assert_eq!(
                    nodes[id].group.get_locally("Tom").await,
                    Ok(ByteView::from("630"))
                );
                assert_eq!(nodes[id].getter.calls(), 0);
            }
        });
    }

    #[test]
    fn failed_replications_are_reported() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let group = registry.new_group("test", 1024, CountingGetter::new(&[("Tom", "630")]));
            group.register_peers(Arc::new(FixedPicker(vec![broken_peer()])));

            let failures = Arc::new(Mutex::new(Vec::new()));
            let reported = failures.clone();
            group.set_replication_hook(move |failure: &ReplicationFailure| {
                reported.lock().unwrap().push(failure.clone());
            });

            // The caller is not affected by the broken peer...
            assert_eq!(group.get("Tom").await, Ok(ByteView::from("630")));
            settle().await;

            assert_eq!(group.stats().replication_failures, 1);
            assert_eq!(
                failures.lock().unwrap().clone(),
                vec![ReplicationFailure {
                    group: "test".to_owned(),
                    key: "Tom".to_owned(),
                    peer: "broken".to_owned(),
                    error: CacheError::PeerUnavailable("connection refused".to_owned()),
                }]
            );
        });
    }

    #[test]
    fn broken_peers_fall_back_to_the_local_error() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let group = registry.new_group("test", 1024, CountingGetter::new(&[]));
            group.register_peers(Arc::new(FixedPicker(vec![broken_peer()])));

            assert_eq!(group.get("Tom").await.unwrap_err().is_not_found(), true);
            assert_eq!(group.stats().peer_errors, 1);
        });
    }

    #[test]
    fn registries_list_their_groups() {
        let registry = Registry::new();
        let _ = registry.new_group("scores", 0, CountingGetter::new(&[]));
        let _ = registry.new_group("names", 0, CountingGetter::new(&[]));

        let names: Vec<String> = registry
            .groups()
            .iter()
            .map(|group| group.name().to_owned())
            .collect();
        assert_eq!(names, vec!["names", "scores"]);
        assert_eq!(registry.group("scores").unwrap().max_memory(), 0);
        assert_eq!(registry.group("unknown").is_none(), true);
    }

    #[test]
    #[should_panic]
    fn empty_group_names_are_rejected() {
        let _ = Registry::new().new_group("", 1024, CountingGetter::new(&[]));
    }

    #[test]
    #[should_panic]
    fn duplicate_group_names_are_rejected() {
        let registry = Registry::new();
        let _ = registry.new_group("scores", 1024, CountingGetter::new(&[]));
        let _ = registry.new_group("scores", 1024, CountingGetter::new(&[]));
    }

    #[test]
    #[should_panic]
    fn peers_can_only_be_registered_once() {
        let registry = Registry::new();
        let group = registry.new_group("scores", 1024, CountingGetter::new(&[]));
        group.register_peers(Arc::new(FixedPicker(Vec::new())));
        group.register_peers(Arc::new(FixedPicker(Vec::new())));
    }
}
