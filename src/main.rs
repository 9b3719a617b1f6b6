use clap::Parser;
use distributed_cache::cache::config::CacheConfig;
use distributed_cache::cache::registry::TenantRegistry;
use distributed_cache::server::config::ServerConfig;
use distributed_cache::server::service::Server;
use std::path::PathBuf;
use std::time::Duration;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Distributed multi-tenant in-memory cache node.
#[derive(Parser)]
#[command(name = "distributed-cache", version)]
struct Cli {
    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// TCP line-protocol listen address.
    #[arg(long, default_value = "127.0.0.1:9000")]
    tcp: String,

    /// Node id; defaults to the HTTP address.
    #[arg(long)]
    id: Option<String>,

    /// Leader HTTP address to join, e.g. http://127.0.0.1:8080.
    #[arg(long)]
    join: Option<String>,

    /// Data directory for tenant snapshots.
    #[arg(long, default_value = "data")]
    data: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    let cache_cfg = CacheConfig {
        data_dir: PathBuf::from(&cli.data),
        ..CacheConfig::default()
    };
    let registry = TenantRegistry::new(cache_cfg);

    // Best-effort restore of any tenant snapshots saved by a previous run.
    match registry.load_all() {
        Ok(0) => {}
        Ok(loaded) => tracing::info!("Restored {} tenant snapshot(s)", loaded),
        Err(e) => tracing::warn!("Unable to load snapshots: {}", e),
    }

    let server_cfg = ServerConfig {
        http_addr: cli.addr,
        tcp_addr: cli.tcp,
        node_id: cli.id,
        join_addr: cli.join,
        ..ServerConfig::default()
    };

    let server = Server::start(registry, server_cfg).await?;
    tracing::info!("Press Ctrl+C to shut down");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    server.shutdown(SHUTDOWN_DEADLINE).await;

    Ok(())
}
