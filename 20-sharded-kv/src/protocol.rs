//! HTTP endpoints and the JSON bodies exchanged on them.
//!
//! Client verbs and replication calls are plain `GET` requests with query
//! parameters, so forwarding a request is just replaying its path and query
//! against another node.

use serde::{Deserialize, Serialize};

/// Read a key. Query: `key`.
pub const ENDPOINT_GET: &str = "/get";
/// Write a key. Query: `key`, `value`.
pub const ENDPOINT_SET: &str = "/set";
/// Drop local keys owned by other shards.
pub const ENDPOINT_PURGE: &str = "/purge";
/// Leader: peek the next pending outbox entry.
pub const ENDPOINT_NEXT_REPLICATION_KEY: &str = "/next-replication-key";
/// Leader: conditionally delete an outbox entry. Query: `key`, `value`.
pub const ENDPOINT_DELETE_REPLICATION_KEY: &str = "/delete-replication-key";
/// Liveness probe.
pub const ENDPOINT_HEALTH: &str = "/health";

/// Body returned by a successful acknowledgement.
pub const ACK_OK: &str = "ok";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValueParams {
    pub key: String,
    pub value: String,
}

/// Answer to `/get`. `value` is `null` when the key does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub shard: usize,
    pub key: String,
    pub value: Option<String>,
}

/// Answer to a successful `/set`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetResponse {
    pub shard: usize,
    pub key: String,
}

/// Answer to `/purge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

/// Answer to `/next-replication-key`.
///
/// An empty `key` means nothing is pending. A non-null `error` reports a
/// failure on the leader, which is different from an empty outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextEntry {
    pub key: String,
    pub value: String,
    pub error: Option<String>,
}

impl NextEntry {
    pub fn pending(key: String, value: String) -> Self {
        Self {
            key,
            value,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}
