//! Wiring for one running node: store, HTTP router and, on replicas, the
//! replication loop.
//!
//! A replica is configured with the same shard name as its leader. The
//! address listed for that shard in the topology is the leader's, which is
//! where the replica pulls from; the replica itself listens elsewhere.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

use crate::config::NodeRole;
use crate::engine::Engine;
use crate::replication::{ReplicaClient, ReplicationSettings};
use crate::router::{self, AppState};
use crate::store::{ClientWrites, Store};
use crate::topology::ShardTopology;

/// Default timeout for a forwarded client request.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

pub struct NodeConfig {
    /// Name used in logs and `/health`, e.g. `"Bangalore replica"`.
    pub label: String,
    pub topology: ShardTopology,
    pub role: NodeRole,
    pub forward_timeout: Duration,
    pub replication: ReplicationSettings,
}

impl NodeConfig {
    /// Config with default timeouts and a label derived from the current
    /// shard's name.
    pub fn new(shard: &str, topology: ShardTopology, role: NodeRole) -> Self {
        Self {
            label: node_label(shard, role),
            topology,
            role,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            replication: ReplicationSettings::default(),
        }
    }
}

/// `"<shard>"` for a leader, `"<shard> replica"` for a replica.
pub fn node_label(shard: &str, role: NodeRole) -> String {
    match role {
        NodeRole::Leader => shard.to_string(),
        NodeRole::Replica => format!("{shard} replica"),
    }
}

/// Handle to a node started with [`spawn_node`]. Dropping it aborts the
/// node's tasks.
pub struct NodeHandle {
    local_addr: SocketAddr,
    label: String,
    store: Arc<Store>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    replication: Option<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Direct access to the node's store, bypassing HTTP.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Stops the replication loop, lets in-flight requests finish and waits
    /// for the server to exit.
    pub async fn shutdown(mut self) {
        if let Some(replication) = self.replication.take() {
            replication.abort();
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            if let Err(err) = server.await {
                warn!(node = %self.label, error = %err, "server task ended abnormally");
            }
        }
        info!(node = %self.label, "node stopped");
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        if let Some(replication) = self.replication.take() {
            replication.abort();
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Serves the node on `listener` and, for replicas, starts pulling from the
/// shard's leader. Must be called from within a Tokio runtime.
pub fn spawn_node(
    listener: TcpListener,
    engine: impl Engine + 'static,
    config: NodeConfig,
) -> Result<NodeHandle> {
    let local_addr = listener
        .local_addr()
        .context("failed to read listener address")?;

    let client_writes = match config.role {
        NodeRole::Leader => ClientWrites::Accept,
        NodeRole::Replica => ClientWrites::Refuse,
    };
    let store = Arc::new(Store::new(engine, client_writes));
    let leader = config.topology.current_address().to_string();
    let shard = config.topology.current_index();

    let state = AppState::new(
        config.topology,
        Arc::clone(&store),
        config.label.as_str(),
        config.forward_timeout,
    )
    .context("failed to build forwarding client")?;
    let app = router::build(state);

    let replication = match config.role {
        NodeRole::Leader => None,
        NodeRole::Replica => {
            let client = ReplicaClient::new(Arc::clone(&store), leader, config.replication)
                .context("failed to build replication client")?;
            let span = info_span!("replication", node = %config.label);
            Some(tokio::spawn(client.run().instrument(span)))
        }
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let label = config.label.clone();
    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(node = %label, error = %err, "http server exited with error");
        }
    });

    info!(
        node = %config.label,
        shard,
        role = ?config.role,
        addr = %local_addr,
        "node listening"
    );

    Ok(NodeHandle {
        local_addr,
        label: config.label,
        store,
        shutdown_tx: Some(shutdown_tx),
        server: Some(server),
        replication,
    })
}
