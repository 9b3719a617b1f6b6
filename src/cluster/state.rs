//! Cluster membership and leader-driven state sync.
//!
//! Membership is a plain map of node id -> `NodeInfo` kept in lockstep with
//! the hash ring. There is no election protocol: the member with the
//! lexicographically smallest id is the leader, joins go to the leader, and
//! followers refresh their whole view by polling the leader's snapshot.

use super::ring::HashRing;
use super::types::{ClusterSnapshot, NodeInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

struct ClusterInner {
    replicas: usize,
    members: HashMap<String, NodeInfo>,
    ring: HashRing,
}

pub struct ClusterState {
    self_node: NodeInfo,
    inner: RwLock<ClusterInner>,
}

impl ClusterState {
    /// Creates the state with `self_node` as the only member.
    pub fn new(self_node: NodeInfo, replicas: usize) -> Arc<Self> {
        let mut ring = HashRing::new(replicas);
        ring.add_node(self_node.clone());

        let mut members = HashMap::new();
        members.insert(self_node.id.clone(), self_node.clone());

        Arc::new(Self {
            self_node,
            inner: RwLock::new(ClusterInner {
                replicas: ring.replicas(),
                members,
                ring,
            }),
        })
    }

    pub fn self_node(&self) -> &NodeInfo {
        &self.self_node
    }

    pub fn replicas(&self) -> usize {
        self.inner.read().replicas
    }

    /// Adds a member and its ring positions. No-op if the id is present.
    pub fn add(&self, node: NodeInfo) {
        let mut inner = self.inner.write();
        if inner.members.contains_key(&node.id) {
            return;
        }
        tracing::info!("Adding cluster member {} at {}", node.id, node.addr);
        inner.members.insert(node.id.clone(), node.clone());
        inner.ring.add_node(node);
    }

    /// Removes a member and its ring positions. No-op if unknown.
    pub fn remove(&self, node_id: &str) {
        let mut inner = self.inner.write();
        if inner.members.remove(node_id).is_none() {
            return;
        }
        tracing::info!("Removing cluster member {}", node_id);
        inner.ring.remove_node(node_id);
    }

    /// Current members sorted by id. The first entry is the leader candidate.
    pub fn members(&self) -> Vec<NodeInfo> {
        let inner = self.inner.read();
        let mut nodes: Vec<NodeInfo> = inner.members.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn lookup_owner(&self, key: &str) -> Option<NodeInfo> {
        self.inner.read().ring.lookup(key)
    }

    pub fn successors(&self, key: &str, count: usize) -> Vec<NodeInfo> {
        self.inner.read().ring.successors(key, count)
    }

    /// Leader is the member with the smallest id.
    pub fn is_leader(&self) -> bool {
        let inner = self.inner.read();
        inner
            .members
            .keys()
            .all(|id| self.self_node.id.as_str() <= id.as_str())
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let inner = self.inner.read();
        let mut nodes: Vec<NodeInfo> = inner.members.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        ClusterSnapshot {
            replicas: inner.replicas,
            nodes,
            ring: inner.ring.snapshot(),
        }
    }

    /// Atomically swaps membership and ring for the snapshot contents.
    pub fn replace(&self, snapshot: &ClusterSnapshot) {
        let mut inner = self.inner.write();
        inner.replicas = snapshot.replicas;
        inner.members = snapshot
            .nodes
            .iter()
            .map(|node| (node.id.clone(), node.clone()))
            .collect();
        inner.ring.replace(&snapshot.ring, snapshot.replicas);
    }

    /// Periodically fetches the leader's snapshot and replaces the local
    /// view. Transient failures are swallowed and retried on the next tick;
    /// the loop exits when `stop` fires.
    pub async fn poll_leader(
        self: Arc<Self>,
        leader_addr: String,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        let client = reqwest::Client::new();
        let url = format!("{}/v1/cluster/state", leader_addr);
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    tracing::debug!("Leader poll loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let response = client
                .get(&url)
                .timeout(POLL_REQUEST_TIMEOUT)
                .send()
                .await;

            let snapshot: ClusterSnapshot = match response {
                Ok(resp) if resp.status().is_success() => match resp.json().await {
                    Ok(snap) => snap,
                    Err(e) => {
                        tracing::debug!("Leader snapshot decode failed: {}", e);
                        continue;
                    }
                },
                Ok(resp) => {
                    tracing::debug!("Leader poll returned status {}", resp.status());
                    continue;
                }
                Err(e) => {
                    tracing::debug!("Leader poll failed: {}", e);
                    continue;
                }
            };

            let before = self.members().len();
            self.replace(&snapshot);
            let after = snapshot.nodes.len();
            if before != after {
                tracing::info!("Cluster view now has {} members", after);
            }
        }
    }
}
