//! Statically sharded key-value store with asynchronous leader → replica
//! replication.
//!
//! Every node reads the same sharding file, hashes each key to a shard and
//! either serves it locally or forwards the request to the shard's leader.
//! Leaders record each write in an outbox; replicas pull from it, apply and
//! acknowledge.
//!
//! # Modules
//!
//! - [`topology`]: shard descriptors and the FNV-1a partitioner
//! - [`config`]: sharding file and node roles
//! - [`engine`] / [`durable`]: bucketed storage engines (in-memory and redb)
//! - [`store`]: data plus replication outbox, the only thing handlers touch
//! - [`protocol`]: endpoint paths and JSON bodies
//! - [`router`]: axum handlers, local serving and forwarding
//! - [`replication`]: replica-side polling loop
//! - [`node`]: wires everything into a running node
//! - [`cli`]: command line of the `kv` binary

pub mod cli;
pub mod config;
pub mod durable;
pub mod engine;
pub mod error;
pub mod node;
pub mod protocol;
pub mod replication;
pub mod router;
pub mod store;
pub mod topology;
