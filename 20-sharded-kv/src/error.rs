//! Error types for each layer of a shard node.
//!
//! Configuration problems surface as [`TopologyError`] and stop the process
//! before it serves traffic. Everything that can go wrong while serving a
//! request ends up as a [`RouterError`], which renders itself as an HTTP
//! response so callers always get an answer. The replica loop has its own
//! [`ReplicationError`] because its failures are logged and retried rather
//! than returned to anyone.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Invalid static shard layout.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology requires at least one shard")]
    Empty,
    #[error("duplicate shard index: {0}")]
    DuplicateIndex(usize),
    #[error("shard {0} is not found")]
    MissingIndex(usize),
    #[error("shard {0:?} was not found")]
    UnknownShard(String),
}

/// Failure reported by the local store or the engine underneath it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("node does not accept client writes")]
    ReadOnly,
    #[error("key must not be empty")]
    EmptyKey,
    #[error("storage engine error: {0}")]
    Engine(String),
    #[error("failed to open database: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn engine(err: impl std::fmt::Display) -> Self {
        StoreError::Engine(err.to_string())
    }
}

/// Error produced while serving a client request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("error forwarding request to shard {shard} ({address}): {source}")]
    Forward {
        shard: usize,
        address: String,
        #[source]
        source: reqwest::Error,
    },
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = match &self {
            RouterError::Store(StoreError::ReadOnly) => StatusCode::FORBIDDEN,
            RouterError::Store(StoreError::EmptyKey) => StatusCode::BAD_REQUEST,
            RouterError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::Forward { .. } => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

/// Failure of a single replica polling cycle.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("replica failed to contact leader {leader} after {attempts} attempts: {source}")]
    LeaderUnreachable {
        leader: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode response from leader: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("server-side error during replication: {0}")]
    Leader(String),
    #[error("failed to apply replicated key {key:?}: {source}")]
    Apply {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("leader rejected acknowledgement: {0}")]
    Acknowledge(String),
    #[error("acknowledgement request failed: {0}")]
    AcknowledgeTransport(#[source] reqwest::Error),
}
