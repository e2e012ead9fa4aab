//! Static sharding configuration.
//!
//! The deployment is described by a TOML file listing every shard:
//!
//! ```toml
//! [[shards]]
//! name = "Hyderabad"
//! idx = 0
//! address = "127.0.0.2:8080"
//! ```
//!
//! Each process also learns its own shard name and whether it is the leader
//! or a replica from the command line.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::TopologyError;
use crate::topology::{ShardDescriptor, ShardTopology};

/// Whether this process accepts client writes or mirrors a leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Leader,
    Replica,
}

/// Every `[[shards]]` block of the sharding file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ShardingConfig {
    #[serde(default)]
    pub shards: Vec<ShardDescriptor>,
}

impl ShardingConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        contents
            .parse::<Self>()
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Validated topology as seen from the shard called `current`.
    pub fn topology(&self, current: &str) -> Result<ShardTopology, TopologyError> {
        ShardTopology::new(&self.shards, current)
    }
}

impl FromStr for ShardingConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SHARDS: &str = r#"
[[shards]]
name = "Hyderabad"
idx = 0
address = "127.0.0.2:8080"

[[shards]]
name = "Bangalore"
idx = 1
address = "127.0.0.3:8080"
"#;

    #[test]
    fn parses_shard_blocks() {
        let config: ShardingConfig = TWO_SHARDS.parse().unwrap();
        assert_eq!(config.shards.len(), 2);
        assert_eq!(config.shards[0].name, "Hyderabad");
        assert_eq!(config.shards[1].index, 1);
        assert_eq!(config.shards[1].address, "127.0.0.3:8080");
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharding.toml");
        std::fs::write(&path, TWO_SHARDS).unwrap();

        let config = ShardingConfig::from_file(&path).unwrap();
        let topology = config.topology("Bangalore").unwrap();
        assert_eq!(topology.count(), 2);
        assert_eq!(topology.current_index(), 1);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = ShardingConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here.toml"));
    }

    #[test]
    fn rejects_negative_index() {
        let bad = r#"
[[shards]]
name = "Hyderabad"
idx = -1
address = "127.0.0.2:8080"
"#;
        assert!(bad.parse::<ShardingConfig>().is_err());
    }

    #[test]
    fn empty_file_has_no_valid_topology() {
        let config: ShardingConfig = "".parse().unwrap();
        assert_eq!(config.topology("Hyderabad"), Err(TopologyError::Empty));
    }
}
