//! End-to-end routing across real nodes on localhost.
//!
//! With two shards, `"x"` hashes to shard 1 and `"a"` to shard 0, which the
//! tests use to force local and forwarded paths.

use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use sharded_kv::config::NodeRole;
use sharded_kv::engine::MemoryEngine;
use sharded_kv::node::{NodeConfig, NodeHandle, spawn_node};
use sharded_kv::protocol::{GetResponse, PurgeResponse, SetResponse};
use sharded_kv::topology::{ShardDescriptor, ShardTopology};
use tokio::net::TcpListener;

/// One leader per shard, each on an ephemeral port.
struct TestCluster {
    nodes: Vec<NodeHandle>,
    client: reqwest::Client,
}

impl TestCluster {
    async fn spawn(names: &[&str]) -> Result<Self> {
        // Bind first so every node knows every address before starting.
        let mut listeners = Vec::new();
        let mut shards = Vec::new();
        for (index, name) in names.iter().enumerate() {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            shards.push(ShardDescriptor::new(
                *name,
                index,
                listener.local_addr()?.to_string(),
            ));
            listeners.push(listener);
        }

        let mut nodes = Vec::new();
        for (listener, name) in listeners.into_iter().zip(names) {
            let topology = ShardTopology::new(&shards, name)?;
            let config = NodeConfig::new(name, topology, NodeRole::Leader);
            nodes.push(spawn_node(listener, MemoryEngine::new(), config)?);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { nodes, client })
    }

    fn node(&self, index: usize) -> &NodeHandle {
        &self.nodes[index]
    }

    async fn set(&self, via: usize, key: &str, value: &str) -> Result<reqwest::Response> {
        let url = format!("http://{}/set", self.node(via).local_addr());
        Ok(self
            .client
            .get(url)
            .query(&[("key", key), ("value", value)])
            .send()
            .await?)
    }

    async fn get(&self, via: usize, key: &str) -> Result<GetResponse> {
        let url = format!("http://{}/get", self.node(via).local_addr());
        let response = self.client.get(url).query(&[("key", key)]).send().await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(response.json().await?)
    }

    async fn purge(&self, via: usize) -> Result<usize> {
        let url = format!("http://{}/purge", self.node(via).local_addr());
        let response: PurgeResponse = self.client.get(url).send().await?.json().await?;
        Ok(response.purged)
    }
}

#[tokio::test]
async fn write_is_forwarded_to_owning_shard() -> Result<()> {
    let cluster = TestCluster::spawn(&["A", "B"]).await?;

    let response = cluster.set(0, "x", "1").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let set: SetResponse = response.json().await?;
    assert_eq!(set.shard, 1);

    // Stored on B only.
    assert_eq!(cluster.node(1).store().get("x")?, Some(b"1".to_vec()));
    assert_eq!(cluster.node(0).store().get("x")?, None);

    for via in [0, 1] {
        let got = cluster.get(via, "x").await?;
        assert_eq!(got.shard, 1);
        assert_eq!(got.value.as_deref(), Some("1"));
    }
    Ok(())
}

#[tokio::test]
async fn any_node_reads_back_any_write() -> Result<()> {
    let cluster = TestCluster::spawn(&["Hyderabad", "Bangalore", "Mumbai"]).await?;

    for i in 0..30 {
        let key = format!("key-{i}");
        let via = i % 3;
        let response = cluster.set(via, &key, &format!("value-{i}")).await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    for i in 0..30 {
        let key = format!("key-{i}");
        let got = cluster.get((i + 1) % 3, &key).await?;
        assert_eq!(got.value, Some(format!("value-{i}")));
    }

    // Each key lives on exactly one node.
    let total: usize = (0..3)
        .map(|n| cluster.node(n).store().len())
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .sum();
    assert_eq!(total, 30);
    Ok(())
}

#[tokio::test]
async fn missing_key_reads_as_null() -> Result<()> {
    let cluster = TestCluster::spawn(&["A", "B"]).await?;
    let got = cluster.get(1, "a").await?;
    assert_eq!(got.shard, 0);
    assert_eq!(got.value, None);
    Ok(())
}

#[tokio::test]
async fn forward_failure_is_reported_not_retried() -> Result<()> {
    let cluster = TestCluster::spawn(&["A", "B"]).await?;
    let mut nodes = cluster.nodes;
    // Take B down; A still routes "x" to it.
    nodes.pop().expect("two nodes").shutdown().await;
    let a = &nodes[0];

    let response = reqwest::Client::new()
        .get(format!("http://{}/set", a.local_addr()))
        .query(&[("key", "x"), ("value", "1")])
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(a.store().get("x")?, None);
    Ok(())
}

#[tokio::test]
async fn purge_after_resharding_drops_foreign_keys() -> Result<()> {
    let cluster = TestCluster::spawn(&["A", "B"]).await?;
    // Simulate leftovers from an older layout by writing straight into A.
    cluster.node(0).store().put("x", b"stale")?;
    cluster.node(0).store().put("a", b"mine")?;

    assert_eq!(cluster.purge(0).await?, 1);
    assert_eq!(cluster.node(0).store().get("x")?, None);
    assert_eq!(cluster.node(0).store().get("a")?, Some(b"mine".to_vec()));

    assert_eq!(cluster.purge(0).await?, 0);
    Ok(())
}
