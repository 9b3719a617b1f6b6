use super::config::ServerConfig;
use super::handlers::*;
use super::tcp;
use crate::cache::registry::TenantRegistry;
use crate::cluster::ring::placement_key;
use crate::cluster::state::ClusterState;
use crate::cluster::types::{ClusterSnapshot, NodeInfo};
use crate::replication::pipeline::{ReplicationPipeline, ReplicationTask};
use crate::replication::protocol::ENDPOINT_REPLICATE;
use axum::extract::Extension;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const JOIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared state handed to every handler.
pub struct ServerContext {
    pub registry: Arc<TenantRegistry>,
    pub cluster: Arc<ClusterState>,
    pub replicator: Arc<ReplicationPipeline>,
    pub cfg: ServerConfig,
    pub http_client: reqwest::Client,
}

impl ServerContext {
    /// Queues one replication task per successor beyond the primary for the
    /// given write. The primary (ring index 0) already holds the value, so
    /// it is skipped. Queue overflow is logged by the pipeline and ignored
    /// here; the client's ack never waits on replication.
    pub fn enqueue_replication(
        &self,
        tenant: &str,
        key: &str,
        value: &[u8],
        ttl_secs: i64,
        timestamp: i64,
    ) {
        let placement = placement_key(tenant, key);
        let successors = self
            .cluster
            .successors(&placement, self.cluster.replicas());

        for dest in successors.into_iter().skip(1) {
            let _ = self.replicator.enqueue(ReplicationTask {
                dest,
                tenant: tenant.to_string(),
                key: key.to_string(),
                value: value.to_vec(),
                ttl_secs,
                timestamp,
                attempt: 0,
            });
        }
    }
}

pub fn build_router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/v1/ping", get(handle_ping))
        .route("/v1/user", post(handle_user_create))
        .route("/v1/user/:user_id", delete(handle_user_delete))
        .route("/v1/user/snapshot", post(handle_snapshot_save))
        .route("/v1/user/restore", post(handle_snapshot_restore))
        .route("/v1/set", post(handle_set))
        .route("/v1/get", get(handle_get))
        .route("/v1/delete", delete(handle_delete))
        .route("/v1/keys", get(handle_keys))
        .route("/v1/cluster/join", post(handle_cluster_join))
        .route("/v1/cluster/state", get(handle_cluster_state))
        .route(ENDPOINT_REPLICATE, post(handle_internal_replicate))
        .layer(Extension(ctx))
}

/// A running node: HTTP listener, TCP listener, replication workers, and
/// (when joined) the leader poll loop.
pub struct Server {
    ctx: Arc<ServerContext>,
    http_addr: SocketAddr,
    tcp_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Binds both listeners, initializes cluster state with self, joins the
    /// leader when configured (falling back to standalone on failure), and
    /// starts all background tasks.
    pub async fn start(registry: Arc<TenantRegistry>, cfg: ServerConfig) -> anyhow::Result<Server> {
        let http_listener = TcpListener::bind(&cfg.http_addr).await?;
        let http_addr = http_listener.local_addr()?;
        let tcp_listener = TcpListener::bind(&cfg.tcp_addr).await?;
        let tcp_addr = tcp_listener.local_addr()?;

        let node_id = cfg
            .node_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| http_addr.to_string());
        let self_node = NodeInfo {
            id: node_id,
            addr: http_addr.to_string(),
        };
        tracing::info!("Node {} at http {} / tcp {}", self_node.id, http_addr, tcp_addr);

        let cluster = ClusterState::new(self_node, cfg.ring_replicas);
        let replicator = ReplicationPipeline::new(
            cfg.replication_workers,
            cfg.replication_queue_size,
            cfg.replication_timeout,
            cfg.replication_max_retries,
        );
        replicator.start();

        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();

        if let Some(join_addr) = cfg.join_addr.clone().filter(|addr| !addr.is_empty()) {
            match join_leader(&join_addr, cluster.self_node()).await {
                Ok(snapshot) => {
                    tracing::info!(
                        "Joined cluster via {} ({} members)",
                        join_addr,
                        snapshot.nodes.len()
                    );
                    cluster.replace(&snapshot);
                    tasks.push(tokio::spawn(cluster.clone().poll_leader(
                        join_addr,
                        cfg.poll_interval,
                        shutdown_tx.subscribe(),
                    )));
                }
                Err(e) => {
                    tracing::warn!("Join via {} failed, starting standalone: {}", join_addr, e);
                }
            }
        }

        let ctx = Arc::new(ServerContext {
            registry,
            cluster,
            replicator,
            cfg,
            http_client: reqwest::Client::new(),
        });

        let app = build_router(ctx.clone());
        let mut http_shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = http_shutdown.changed().await;
            };
            if let Err(e) = axum::serve(http_listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        }));

        tasks.push(tokio::spawn(tcp::accept_loop(
            tcp_listener,
            ctx.registry.clone(),
            shutdown_tx.subscribe(),
        )));

        Ok(Server {
            ctx,
            http_addr,
            tcp_addr,
            shutdown_tx,
            tasks: parking_lot::Mutex::new(tasks),
        })
    }

    /// Actual bound HTTP address (resolves port 0).
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Actual bound TCP address.
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Broadcasts the stop signal, drains listeners and workers within the
    /// deadline, then halts the tenant sweepers. Stragglers past the
    /// deadline are abandoned.
    pub async fn shutdown(&self, deadline: Duration) {
        let _ = self.shutdown_tx.send(true);
        self.ctx.replicator.stop(deadline).await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            tracing::warn!("Background tasks did not finish before deadline");
        }

        self.ctx.registry.stop_all();
        tracing::info!("Server stopped");
    }
}

/// POSTs our identity to the leader and returns the snapshot it answers
/// with. Redirects from non-leaders are followed transparently.
async fn join_leader(leader_addr: &str, self_node: &NodeInfo) -> anyhow::Result<ClusterSnapshot> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/cluster/join", leader_addr))
        .json(self_node)
        .timeout(JOIN_REQUEST_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("join failed with status {}", response.status());
    }
    Ok(response.json().await?)
}
