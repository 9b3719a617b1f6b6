use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A cluster member identity.
///
/// `id` must be unique within the cluster and lexicographically comparable;
/// the member with the smallest id acts as the leader. `addr` is the HTTP
/// address other nodes dial, e.g. `"127.0.0.1:8080"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub id: String,
    pub addr: String,
}

/// Serializable view of the full cluster state.
///
/// Exchanged on `/v1/cluster/join` (response) and `/v1/cluster/state`.
/// Ring positions are encoded as decimal strings so the map keys survive
/// JSON round-trips unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub replicas: usize,
    pub nodes: Vec<NodeInfo>,
    pub ring: HashMap<String, NodeInfo>,
}
