use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sharded_kv::{
    cli::Cli,
    config::ShardingConfig,
    durable::RedbEngine,
    engine::MemoryEngine,
    node::{NodeConfig, spawn_node},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let sharding = ShardingConfig::from_file(&cli.config_file)?;
    let topology = sharding
        .topology(&cli.shard)
        .with_context(|| format!("invalid sharding config {}", cli.config_file.display()))?;
    info!(
        shard = %cli.shard,
        index = topology.current_index(),
        count = topology.count(),
        "loaded sharding config"
    );

    let listener = TcpListener::bind(&cli.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.http_addr))?;
    let config = NodeConfig::new(&cli.shard, topology, cli.role());

    let node = if cli.in_memory {
        spawn_node(listener, MemoryEngine::new(), config)?
    } else {
        let Some(path) = cli.db_location.as_ref() else {
            bail!("--db-location is required unless --in-memory is set");
        };
        let engine = RedbEngine::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        spawn_node(listener, engine, config)?
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
    node.shutdown().await;
    Ok(())
}
