//! Provides a consistent hash ring with virtual nodes.
//!
//! Each real node is placed on the ring several times (**virtual_nodes**), at the hash of
//! `"<index><node>"`. A key is owned by the node of the first ring position which is greater or
//! equal to the hash of the key, wrapping around at the end of the ring. Using virtual nodes
//! smooths out the otherwise rather uneven distribution of a handful of hash values.
//!
//! For replication, [replicas](Ring::replicas) walks the ring from the position of the key and
//! collects distinct real nodes, so that the first entry is always the primary owner.
//!
//! Note that all participants of a cluster have to use the same hash function, the same number
//! of virtual nodes and the very same node ids, otherwise they disagree on ownership.
//!
//! # Examples
//!
//! ```
//! # use dcache::consistenthash::Ring;
//! let mut ring = Ring::new(50);
//! ring.add(["http://10.0.0.1:8080", "http://10.0.0.2:8080", "http://10.0.0.3:8080"]);
//!
//! let owner = ring.get("Tom").unwrap();
//! let replicas = ring.replicas("Tom", 2);
//! assert_eq!(replicas.len(), 2);
//! assert_eq!(replicas[0], owner);
//! assert_ne!(replicas[0], replicas[1]);
//! ```
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Represents the hash function used to place nodes and keys on the ring.
pub type HashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Maps keys to their owning nodes.
#[derive(Clone)]
pub struct Ring {
    hash: HashFn,
    virtual_nodes: usize,
    positions: Vec<(u32, String)>,
}

impl Ring {
    /// Creates an empty ring which uses CRC-32 (IEEE) as hash function.
    pub fn new(virtual_nodes: usize) -> Self {
        Ring::with_hash(virtual_nodes, crc32fast::hash)
    }

    /// Creates an empty ring which uses the given hash function.
    ///
    /// # Examples
    ///
    /// Using the numeric value of the key as hash makes the placement easy to follow:
    /// ```
    /// # use dcache::consistenthash::Ring;
    /// let mut ring = Ring::with_hash(3, |data| {
    ///     std::str::from_utf8(data).unwrap().parse::<u32>().unwrap()
    /// });
    ///
    /// // Places 2, 12, 22, 4, 14, 24, 6, 16, 26 on the ring...
    /// ring.add(["6", "4", "2"]);
    ///
    /// assert_eq!(ring.get("11"), Some("2"));
    /// assert_eq!(ring.get("23"), Some("4"));
    /// // 27 is beyond the last position, therefore we wrap around to 2...
    /// assert_eq!(ring.get("27"), Some("2"));
    /// ```
    pub fn with_hash<F>(virtual_nodes: usize, hash: F) -> Self
    where
        F: Fn(&[u8]) -> u32 + Send + Sync + 'static,
    {
        Ring {
            hash: Arc::new(hash),
            virtual_nodes,
            positions: Vec::new(),
        }
    }

    /// Places the given nodes on the ring.
    pub fn add<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for node in nodes {
            let node = node.as_ref();
            for index in 0..self.virtual_nodes {
                let hash = (self.hash)(format!("{}{}", index, node).as_bytes());
                self.positions.push((hash, node.to_owned()));
            }
        }

        // A stable sort keeps colliding positions in insertion order, so that every participant
        // resolves a collision the same way...
        self.positions.sort_by_key(|(hash, _)| *hash);
    }

    /// Determines if no node has been added yet.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the number of virtual positions on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns the number of virtual nodes per real node.
    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Returns the index of the first position which owns the given key.
    fn position_of(&self, key: &str) -> usize {
        let hash = (self.hash)(key.as_bytes());
        let index = self.positions.partition_point(|(position, _)| *position < hash);

        index % self.positions.len()
    }

    /// Returns the primary owner of the given key or **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }

        Some(self.positions[self.position_of(key)].1.as_str())
    }

    /// Returns up to **count** distinct owners of the given key in ring order.
    ///
    /// The first entry is the primary owner (as returned by [get](Ring::get)). Fewer entries are
    /// returned if the ring doesn't contain enough distinct nodes.
    pub fn replicas(&self, key: &str, count: usize) -> Vec<&str> {
        let mut result = Vec::new();
        if self.positions.is_empty() || count == 0 {
            return result;
        }

        let start = self.position_of(key);
        let mut seen = HashSet::new();
        for offset in 0..self.positions.len() {
            let node = self.positions[(start + offset) % self.positions.len()]
                .1
                .as_str();
            if seen.insert(node) {
                result.push(node);
                if result.len() == count {
                    break;
                }
            }
        }

        result
    }
}

impl fmt::Debug for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("virtual_nodes", &self.virtual_nodes)
            .field("positions", &self.positions.len())
            .finish()
    }
}
