//! Static shard layout and key partitioning.
//!
//! A [`ShardTopology`] is built once at startup from the configured shard
//! descriptors and then shared read-only by every request handler. The
//! partition function must agree bit-for-bit across all nodes, otherwise
//! requests land on the wrong shard and data becomes invisible.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over the raw UTF-8 bytes of the key.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// One `[[shards]]` entry from the sharding config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub name: String,
    #[serde(rename = "idx")]
    pub index: usize,
    pub address: String,
}

impl ShardDescriptor {
    pub fn new(name: impl Into<String>, index: usize, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index,
            address: address.into(),
        }
    }
}

/// Validated shard layout plus the identity of the local shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTopology {
    count: usize,
    current: usize,
    addresses: HashMap<usize, String>,
}

impl ShardTopology {
    /// Builds the topology, rejecting duplicate indices, gaps in `0..count`,
    /// and a `current` name that no descriptor carries.
    pub fn new(shards: &[ShardDescriptor], current: &str) -> Result<Self, TopologyError> {
        if shards.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut addresses = HashMap::with_capacity(shards.len());
        let mut current_index = None;
        for shard in shards {
            if addresses.contains_key(&shard.index) {
                return Err(TopologyError::DuplicateIndex(shard.index));
            }
            addresses.insert(shard.index, shard.address.clone());
            if shard.name == current {
                current_index = Some(shard.index);
            }
        }

        let count = shards.len();
        if let Some(missing) = (0..count).find(|index| !addresses.contains_key(index)) {
            return Err(TopologyError::MissingIndex(missing));
        }

        let current =
            current_index.ok_or_else(|| TopologyError::UnknownShard(current.to_string()))?;

        Ok(Self {
            count,
            current,
            addresses,
        })
    }

    /// Number of shards in the deployment.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Index of the shard this process serves.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Address of the node serving `index`, if the index exists.
    pub fn address(&self, index: usize) -> Option<&str> {
        self.addresses.get(&index).map(String::as_str)
    }

    /// Address listed for the local shard. Replicas pull from it.
    pub fn current_address(&self) -> &str {
        // Construction guarantees the current index is present.
        self.addresses
            .get(&self.current)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Maps a key to its owning shard: `fnv1a_64(key) mod count`.
    pub fn partition(&self, key: &str) -> usize {
        (fnv1a_64(key.as_bytes()) % self.count as u64) as usize
    }

    /// True when `key` belongs to the local shard.
    pub fn owns(&self, key: &str) -> bool {
        self.partition(key) == self.current
    }
}
