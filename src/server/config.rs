use std::time::Duration;

/// Node-level configuration: listen addresses, cluster identity, and the
/// knobs for forwarding and replication.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: String,
    pub tcp_addr: String,
    /// Cluster-unique id; defaults to the bound HTTP address when absent.
    pub node_id: Option<String>,
    /// Leader HTTP address to join, e.g. "http://127.0.0.1:8080". Absent
    /// means start standalone (and therefore as leader).
    pub join_addr: Option<String>,
    /// Virtual positions per node on the hash ring.
    pub ring_replicas: usize,
    /// How often a follower refreshes the leader's snapshot.
    pub poll_interval: Duration,
    /// Deadline for forwarded requests.
    pub cmd_timeout: Duration,
    pub replication_workers: usize,
    pub replication_queue_size: usize,
    /// Per-attempt deadline for one replication delivery.
    pub replication_timeout: Duration,
    pub replication_max_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            tcp_addr: "127.0.0.1:9000".to_string(),
            node_id: None,
            join_addr: None,
            ring_replicas: 10,
            poll_interval: Duration::from_secs(2),
            cmd_timeout: Duration::from_secs(5),
            replication_workers: 4,
            replication_queue_size: 100,
            replication_timeout: Duration::from_millis(300),
            replication_max_retries: 3,
        }
    }
}
