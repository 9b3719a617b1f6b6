//! Consistent-hash ring with virtual nodes.
//!
//! Every physical node occupies `replicas` positions on a 64-bit hash ring.
//! A key is owned by the node at the first position greater than or equal to
//! the key's hash, wrapping around at the top of the space. Virtual positions
//! smooth out the distribution so that adding or removing a node only moves
//! a small fraction of the keyspace.
//!
//! The ring itself carries no lock; `ClusterState` guards it with a
//! read-write lock and replaces it wholesale when syncing from the leader.

use super::types::NodeInfo;
use fnv::FnvHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;

/// Separator between tenant and key when computing placement hashes.
/// Fixed so that every node (and every peer version) maps the same
/// tenant/key pair to the same ring position.
pub const PLACEMENT_SEPARATOR: &str = ":|:";

/// Builds the string that is hashed to place a tenant/key pair on the ring.
pub fn placement_key(tenant: &str, key: &str) -> String {
    format!("{}{}{}", tenant, PLACEMENT_SEPARATOR, key)
}

/// 64-bit FNV-1a over the UTF-8 bytes of `s`.
pub fn hash64(s: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

const DEFAULT_REPLICAS: usize = 10;

pub struct HashRing {
    replicas: usize,
    /// Sorted virtual positions.
    positions: Vec<u64>,
    /// Position -> owning node.
    owners: HashMap<u64, NodeInfo>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        let replicas = if replicas == 0 {
            DEFAULT_REPLICAS
        } else {
            replicas
        };
        Self {
            replicas,
            positions: Vec::new(),
            owners: HashMap::new(),
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Inserts `replicas` virtual positions for `node`.
    ///
    /// Re-adding a node whose id is already on the ring is a full replace of
    /// that node's positions, so a changed address takes effect immediately.
    /// Position collisions between distinct inputs resolve last-write-wins,
    /// which is deterministic for a given insertion order.
    pub fn add_node(&mut self, node: NodeInfo) {
        self.remove_node(&node.id);
        for i in 0..self.replicas {
            let position = hash64(&format!("{}#{}", node.addr, i));
            if self.owners.insert(position, node.clone()).is_none() {
                self.positions.push(position);
            }
        }
        self.positions.sort_unstable();
    }

    /// Removes every virtual position owned by `node_id`.
    pub fn remove_node(&mut self, node_id: &str) {
        let owners = &mut self.owners;
        self.positions.retain(|position| {
            let owned = owners
                .get(position)
                .map(|node| node.id == node_id)
                .unwrap_or(false);
            if owned {
                owners.remove(position);
            }
            !owned
        });
    }

    /// Index of the first position at or after `hash`, wrapping to 0.
    fn start_index(&self, hash: u64) -> usize {
        let idx = self.positions.partition_point(|&p| p < hash);
        if idx == self.positions.len() {
            0
        } else {
            idx
        }
    }

    /// Returns the node responsible for `key`, or `None` on an empty ring.
    pub fn lookup(&self, key: &str) -> Option<NodeInfo> {
        if self.positions.is_empty() {
            return None;
        }
        let idx = self.start_index(hash64(key));
        self.owners.get(&self.positions[idx]).cloned()
    }

    /// Walks the ring clockwise from the owner of `key`, collecting up to
    /// `count` distinct nodes. The first entry is the primary.
    pub fn successors(&self, key: &str, count: usize) -> Vec<NodeInfo> {
        let mut result = Vec::with_capacity(count);
        if self.positions.is_empty() || count == 0 {
            return result;
        }

        let start = self.start_index(hash64(key));
        let mut seen: HashSet<&str> = HashSet::new();

        for i in 0..self.positions.len() {
            if result.len() >= count {
                break;
            }
            let position = self.positions[(start + i) % self.positions.len()];
            if let Some(node) = self.owners.get(&position) {
                if seen.insert(node.id.as_str()) {
                    result.push(node.clone());
                }
            }
        }
        result
    }

    /// Serializable view: decimal position string -> node.
    pub fn snapshot(&self) -> HashMap<String, NodeInfo> {
        self.positions
            .iter()
            .filter_map(|position| {
                self.owners
                    .get(position)
                    .map(|node| (position.to_string(), node.clone()))
            })
            .collect()
    }

    /// Rebuilds the ring from a snapshot. Entries whose position string does
    /// not parse are skipped; the rebuild is deterministic for a given
    /// snapshot.
    pub fn replace(&mut self, snapshot: &HashMap<String, NodeInfo>, replicas: usize) {
        self.replicas = if replicas == 0 {
            DEFAULT_REPLICAS
        } else {
            replicas
        };
        self.positions.clear();
        self.owners = HashMap::with_capacity(snapshot.len());

        for (position_str, node) in snapshot {
            let position: u64 = match position_str.parse() {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!("Skipping unparsable ring position {:?}", position_str);
                    continue;
                }
            };
            if self.owners.insert(position, node.clone()).is_none() {
                self.positions.push(position);
            }
        }
        self.positions.sort_unstable();
    }
}
