//! Consistent hashing over a ring of virtual nodes
//!
//! Each real peer contributes `replicas` virtual points placed at
//! `hash(decimal(i) ++ peer)`. A key is owned by the peer whose virtual
//! point is the first one clockwise from `hash(key)`, wrapping around the
//! ring. More replicas smooth the key distribution at the cost of a larger
//! ring.

use std::collections::{HashMap, HashSet};

/// Ring hash function mapping bytes to a point on the `u32` circle.
pub type HashFn = fn(&[u8]) -> u32;

/// A consistent-hash ring with virtual nodes.
///
/// Colliding virtual points resolve last-write-wins, so re-registering a
/// peer set is an overwrite operation.
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    /// Sorted virtual points; always exactly the key set of `owners`.
    points: Vec<u32>,
    owners: HashMap<u32, String>,
}

impl HashRing {
    /// Create a ring placing `replicas` virtual points per peer. A zero
    /// replica count is treated as one. `hash` defaults to CRC32-IEEE.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        HashRing {
            replicas: replicas.max(1),
            hash: hash.unwrap_or(crc32fast::hash),
            points: Vec::new(),
            owners: HashMap::new(),
        }
    }

    /// Register peers on the ring.
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for peer in peers {
            let peer = peer.into();
            for i in 0..self.replicas {
                let point = (self.hash)(format!("{i}{peer}").as_bytes());
                if self.owners.insert(point, peer.clone()).is_none() {
                    self.points.push(point);
                }
            }
        }
        self.points.sort_unstable();
    }

    /// Drop a peer's virtual points. Points a later registration overwrote
    /// stay with their current owner.
    pub fn remove(&mut self, peer: &str) {
        for i in 0..self.replicas {
            let point = (self.hash)(format!("{i}{peer}").as_bytes());
            if self.owners.get(&point).map(String::as_str) == Some(peer) {
                self.owners.remove(&point);
                if let Ok(pos) = self.points.binary_search(&point) {
                    self.points.remove(pos);
                }
            }
        }
    }

    /// The peer owning `key`, or `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let target = (self.hash)(key.as_bytes());
        let idx = self.points.partition_point(|&p| p < target);
        let point = self.points[idx % self.points.len()];
        self.owners.get(&point).map(String::as_str)
    }

    /// Whether the ring has no peers.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of distinct peers on the ring.
    pub fn len(&self) -> usize {
        self.owners.values().collect::<HashSet<_>>().len()
    }
}
