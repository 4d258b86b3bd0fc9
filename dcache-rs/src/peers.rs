//! Defines how cache groups talk to other nodes of a cluster.
//!
//! A [Group](crate::group::Group) doesn't know anything about transports. All it needs is a
//! [PeerPicker](PeerPicker) which determines which other nodes own a key and a
//! [PeerClient](PeerClient) per node which can fetch a value (**get**) or push a replicated value
//! (**set**).
//!
//! Two clients are provided: the [HttpPeer](crate::http::HttpPeer) which talks to a remote
//! [Server](crate::server::Server) and the [InProcessPeer](InProcessPeer) which directly invokes
//! a [Registry](crate::group::Registry) living in the same process (which is mostly used to run
//! a whole cluster within a single test).
//!
//! The [PeerPool](PeerPool) is the picker being used in practice. It places all nodes (including
//! itself) on a [Ring](crate::consistenthash::Ring) so that every node agrees on the owners of a
//! key, and then hands out the clients of all owners except itself.
//!
//! # Wire format
//!
//! The messages [GetRequest](GetRequest), [GetResponse](GetResponse) and
//! [SetRequest](SetRequest) are serialized using **bincode**. Note that a missing key is not
//! represented by an empty response, but by a **NotFound** error (which is a 404 for HTTP).
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::byteview::ByteView;
use crate::consistenthash::Ring;
use crate::error::{CacheError, CacheResult};
use crate::group::Registry;

/// Asks a peer for the value of a key within a group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    /// Contains the name of the group.
    pub group: String,
    /// Contains the key to fetch.
    pub key: String,
}

/// Carries the value returned by a peer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    /// Contains the value, which might very well be empty.
    pub value: Vec<u8>,
}

/// Pushes a replicated value to a peer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SetRequest {
    /// Contains the name of the group.
    pub group: String,
    /// Contains the key to store.
    pub key: String,
    /// Contains the value to store.
    pub value: Vec<u8>,
}

/// Serializes a wire message.
pub fn encode<T: Serialize>(message: &T) -> anyhow::Result<Vec<u8>> {
    bincode::serialize(message).context("Failed to serialize a peer message")
}

/// Deserializes a wire message.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> anyhow::Result<T> {
    bincode::deserialize(data).context("Failed to parse a peer message")
}

/// Represents a connection to another node.
///
/// Implementations have to report an unknown key or group as **NotFound** and everything else
/// (transport errors, timeouts, malformed responses) as **PeerUnavailable**, so that callers
/// can tell a miss apart from a broken peer.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Returns the id of the node, as placed on the hash ring.
    fn address(&self) -> &str;

    /// Fetches a value from the peer.
    async fn get(&self, request: &GetRequest) -> CacheResult<GetResponse>;

    /// Pushes a value to the peer.
    async fn set(&self, request: &SetRequest) -> CacheResult<()>;
}

/// Determines which peers own a given key.
///
/// Both methods never return the local node itself.
pub trait PeerPicker: Send + Sync {
    /// Returns the first owner of the key which isn't the local node.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerClient>>;

    /// Returns all owners of the key (in ring order) except the local node.
    fn pick_replicas(&self, key: &str) -> Vec<Arc<dyn PeerClient>>;
}

struct Members {
    ring: Ring,
    clients: HashMap<String, Arc<dyn PeerClient>>,
}

/// Picks peers using a consistent hash ring.
///
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use dcache::group::Registry;
/// # use dcache::peers::{InProcessPeer, PeerClient, PeerPicker, PeerPool};
/// let registry = Registry::new();
/// let pool = PeerPool::new("node-a", 100, 3);
/// pool.set_peers(["node-a", "node-b", "node-c"], |id| {
///     Arc::new(InProcessPeer::new(id, &registry))
/// });
///
/// // The local node is never handed out...
/// let replicas = pool.pick_replicas("Tom");
/// assert_eq!(replicas.len(), 2);
/// assert_eq!(replicas.iter().any(|peer| peer.address() == "node-a"), false);
/// assert_eq!(pool.pick_peer("Tom").unwrap().address(), replicas[0].address());
/// ```
pub struct PeerPool {
    self_id: String,
    virtual_nodes: usize,
    replication_factor: usize,
    members: ArcSwap<Members>,
}

impl PeerPool {
    /// Creates an empty pool for the given local node.
    ///
    /// The **replication_factor** determines how many distinct owners (including the local node
    /// if it is one of them) a key has.
    pub fn new(self_id: &str, virtual_nodes: usize, replication_factor: usize) -> Self {
        PeerPool {
            self_id: self_id.to_owned(),
            virtual_nodes,
            replication_factor: replication_factor.max(1),
            members: ArcSwap::new(Arc::new(Members {
                ring: Ring::new(virtual_nodes),
                clients: HashMap::new(),
            })),
        }
    }

    /// Replaces the set of nodes.
    ///
    /// The ring is rebuilt from scratch and swapped in atomically. The **connect** function is
    /// invoked for each node except the local one.
    pub fn set_peers<I, S, C>(&self, nodes: I, connect: C)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        C: Fn(&str) -> Arc<dyn PeerClient>,
    {
        let mut ring = Ring::new(self.virtual_nodes);
        let mut clients = HashMap::new();
        let mut ids = Vec::new();

        for node in nodes {
            let node = node.as_ref();
            if ids.iter().any(|id: &String| id == node) {
                continue;
            }
            if node != self.self_id {
                let _ = clients.insert(node.to_owned(), connect(node));
            }
            ids.push(node.to_owned());
        }

        ring.add(&ids);
        log::info!(
            "Peer pool of {} now contains {} node(s): {}",
            self.self_id,
            ids.len(),
            ids.join(", ")
        );

        self.members.store(Arc::new(Members { ring, clients }));
    }

    /// Returns the id of the local node.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Returns the number of owners per key.
    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Lists the ids of all remote nodes.
    pub fn peers(&self) -> Vec<String> {
        let mut result: Vec<String> = self.members.load().clients.keys().cloned().collect();
        result.sort();
        result
    }

    /// Returns the clients of all remote owners of the given key.
    fn remote_owners(&self, key: &str, limit: usize) -> Vec<Arc<dyn PeerClient>> {
        let members = self.members.load();
        members
            .ring
            .replicas(key, self.replication_factor)
            .into_iter()
            .filter(|owner| *owner != self.self_id)
            .filter_map(|owner| members.clients.get(owner).cloned())
            .take(limit)
            .collect()
    }
}

impl PeerPicker for PeerPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerClient>> {
        self.remote_owners(key, 1).pop()
    }

    fn pick_replicas(&self, key: &str) -> Vec<Arc<dyn PeerClient>> {
        self.remote_owners(key, usize::MAX)
    }
}

impl fmt::Debug for PeerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerPool")
            .field("self_id", &self.self_id)
            .field("replication_factor", &self.replication_factor)
            .field("peers", &self.peers())
            .finish()
    }
}

/// Talks to a registry within the same process.
///
/// Messages are still passed through the wire format, so that a cluster of in-process nodes
/// behaves just like a networked one. The registry is only weakly referenced, once it has been
/// dropped, the peer reports itself as unavailable.
pub struct InProcessPeer {
    address: String,
    registry: Weak<Registry>,
}

impl InProcessPeer {
    /// Creates a peer which serves requests using the given registry.
    pub fn new(address: &str, registry: &Arc<Registry>) -> Self {
        InProcessPeer {
            address: address.to_owned(),
            registry: Arc::downgrade(registry),
        }
    }

    fn registry(&self) -> CacheResult<Arc<Registry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| CacheError::PeerUnavailable(format!("{} has shut down", self.address)))
    }

    fn transfer<T: Serialize + DeserializeOwned>(&self, message: &T) -> CacheResult<T> {
        encode(message)
            .and_then(|data| decode(&data))
            .map_err(|error| CacheError::PeerUnavailable(format!("{}: {:#}", self.address, error)))
    }
}

#[async_trait]
impl PeerClient for InProcessPeer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get(&self, request: &GetRequest) -> CacheResult<GetResponse> {
        let request = self.transfer(request)?;
        let group = self
            .registry()?
            .group(&request.group)
            .ok_or_else(|| CacheError::NotFound(format!("Unknown group: {}", request.group)))?;

        let value = group.get_locally(&request.key).await?;
        self.transfer(&GetResponse {
            value: value.to_vec(),
        })
    }

    async fn set(&self, request: &SetRequest) -> CacheResult<()> {
        let request = self.transfer(request)?;
        let group = self
            .registry()?
            .group(&request.group)
            .ok_or_else(|| CacheError::NotFound(format!("Unknown group: {}", request.group)))?;

        group.accept_replica(&request.key, ByteView::from(request.value))
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::error::{CacheError, CacheResult};
    use crate::group::{GetterFunc, Registry};
    use crate::peers::{
        decode, encode, GetRequest, GetResponse, InProcessPeer, PeerClient, PeerPicker, PeerPool,
        SetRequest,
    };
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct NamedPeer(String);

    #[async_trait]
    impl PeerClient for NamedPeer {
        fn address(&self) -> &str {
            &self.0
        }

        async fn get(&self, _request: &GetRequest) -> CacheResult<GetResponse> {
            Err(CacheError::PeerUnavailable(self.0.clone()))
        }

        async fn set(&self, _request: &SetRequest) -> CacheResult<()> {
            Err(CacheError::PeerUnavailable(self.0.clone()))
        }
    }

    fn named_peer(id: &str) -> Arc<dyn PeerClient> {
        Arc::new(NamedPeer(id.to_owned()))
    }

    fn request(group: &str, key: &str) -> GetRequest {
        GetRequest {
            group: group.to_owned(),
            key: key.to_owned(),
        }
    }

    #[test]
    fn pools_never_pick_themselves() {
        let pool = PeerPool::new("a", 50, 3);
        pool.set_peers(["a", "b", "c", "d", "e"], named_peer);
        assert_eq!(pool.peers(), vec!["b", "c", "d", "e"]);

        for i in 0..500 {
            let key = format!("key-{}", i);
            let replicas = pool.pick_replicas(&key);
            let addresses: HashSet<_> = replicas.iter().map(|peer| peer.address()).collect();

            assert_eq!(addresses.contains("a"), false);
            assert_eq!(addresses.len(), replicas.len());
            assert_eq!(replicas.len() == 2 || replicas.len() == 3, true);
            assert_eq!(
                pool.pick_peer(&key).unwrap().address(),
                replicas[0].address()
            );
        }
    }

    #[test]
    fn single_node_pools_have_no_peers() {
        let pool = PeerPool::new("a", 50, 3);
        assert_eq!(pool.pick_peer("Tom").is_none(), true);

        pool.set_peers(["a"], named_peer);
        assert_eq!(pool.pick_peer("Tom").is_none(), true);
        assert_eq!(pool.pick_replicas("Tom").is_empty(), true);
    }

    #[test]
    fn replication_factor_limits_the_owners() {
        let pool = PeerPool::new("outsider", 50, 2);
        pool.set_peers(["a", "b", "c", "d"], named_peer);

        // The local node isn't on the ring at all, therefore both owners are remote...
        for i in 0..100 {
            assert_eq!(pool.pick_replicas(&format!("key-{}", i)).len(), 2);
        }
    }

    #[test]
    fn all_pools_agree_on_the_owners() {
        let nodes = ["a", "b", "c"];
        let pools: Vec<PeerPool> = nodes
            .iter()
            .map(|node| {
                let pool = PeerPool::new(node, 100, 1);
                pool.set_peers(nodes, named_peer);
                pool
            })
            .collect();

        for i in 0..200 {
            let key = format!("key-{}", i);
            let owners: HashSet<String> = pools
                .iter()
                .zip(nodes)
                .map(|(pool, node)| {
                    pool.pick_peer(&key)
                        .map(|peer| peer.address().to_owned())
                        .unwrap_or_else(|| node.to_owned())
                })
                .collect();
            assert_eq!(owners.len(), 1);
        }
    }

    #[test]
    fn messages_survive_the_wire() {
        let empty = GetResponse { value: Vec::new() };
        assert_eq!(decode::<GetResponse>(&encode(&empty).unwrap()).unwrap(), empty);

        let set = SetRequest {
            group: "scores".to_owned(),
            key: "Tom".to_owned(),
            value: b"630".to_vec(),
        };
        assert_eq!(decode::<SetRequest>(&encode(&set).unwrap()).unwrap(), set);

        assert_eq!(decode::<SetRequest>(&[1, 2, 3]).is_err(), true);
    }

    #[test]
    fn in_process_peers_serve_their_registry() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let _ = registry.new_group(
                "scores",
                1024,
                Arc::new(GetterFunc(|key: &str| match key {
                    "Tom" => Ok(b"630".to_vec()),
                    _ => Err(anyhow::anyhow!("{} not exist", key)),
                })),
            );
            let peer = InProcessPeer::new("local", &registry);

            let response = peer.get(&request("scores", "Tom")).await.unwrap();
            assert_eq!(response.value, b"630".to_vec());

            assert_eq!(
                peer.get(&request("scores", "Jack")).await.unwrap_err().is_not_found(),
                true
            );
            assert_eq!(
                peer.get(&request("unknown", "Tom")).await.unwrap_err().is_not_found(),
                true
            );

            peer.set(&SetRequest {
                group: "scores".to_owned(),
                key: "Jack".to_owned(),
                value: b"589".to_vec(),
            })
            .await
            .unwrap();
            assert_eq!(
                registry.group("scores").unwrap().get("Jack").await,
                Ok(ByteView::from("589"))
            );
        });
    }

    #[test]
    fn dropped_registries_are_unavailable() {
        crate::testing::test_async(async {
            let registry = Registry::new();
            let peer = InProcessPeer::new("gone", &registry);
            std::mem::drop(registry);

            assert_eq!(
                peer.get(&request("scores", "Tom")).await,
                Err(CacheError::PeerUnavailable("gone has shut down".to_owned()))
            );
        });
    }
}
