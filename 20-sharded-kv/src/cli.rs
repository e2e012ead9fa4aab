use std::path::PathBuf;

use clap::Parser;

use crate::config::NodeRole;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Sharded key-value store node", long_about = None)]
pub struct Cli {
    /// Path to the node's database file.
    #[arg(long, required_unless_present = "in_memory")]
    pub db_location: Option<PathBuf>,

    /// Address the HTTP server binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub http_addr: String,

    /// Static sharding configuration.
    #[arg(long, default_value = "sharding.toml")]
    pub config_file: PathBuf,

    /// Name of the shard this node serves.
    #[arg(long)]
    pub shard: String,

    /// Run as a read-only replica of the shard's leader.
    #[arg(long)]
    pub replica: bool,

    /// Keep data in memory instead of on disk.
    #[arg(long)]
    pub in_memory: bool,
}

impl Cli {
    pub fn role(&self) -> NodeRole {
        if self.replica {
            NodeRole::Replica
        } else {
            NodeRole::Leader
        }
    }
}
