//! Load generator for a running node: a concurrent write phase followed by
//! a concurrent read phase over the keys that were written.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use futures::future::try_join_all;
use rand::Rng;
use tracing::info;

use sharded_kv::protocol::{ENDPOINT_GET, ENDPOINT_SET};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Benchmark a sharded-kv node", long_about = None)]
struct Args {
    /// Address of the node to benchmark.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Writes performed by each worker.
    #[arg(long, default_value_t = 1000)]
    iterations: usize,

    /// Reads performed by each worker.
    #[arg(long, default_value_t = 100_000)]
    read_iterations: usize,

    /// Number of concurrent workers per phase.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,
}

/// Latency summary for one worker.
#[derive(Debug, Clone, Copy)]
struct Stats {
    iterations: usize,
    total: Duration,
    min: Duration,
    max: Duration,
}

impl Stats {
    fn qps(&self) -> f64 {
        self.iterations as f64 / self.total.as_secs_f64().max(f64::EPSILON)
    }

    fn avg(&self) -> Duration {
        let n = u32::try_from(self.iterations.max(1)).unwrap_or(u32::MAX);
        self.total / n
    }

    fn report(&self, phase: &str) {
        println!(
            "-> [{phase}] Avg: {:?} | QPS: {:.1} | Max: {:?} | Min: {:?}",
            self.avg(),
            self.qps(),
            self.max,
            self.min
        );
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn random_suffix() -> u32 {
    rand::thread_rng().gen_range(0..1_000_000)
}

async fn send(client: &reqwest::Client, url: &str, query: &[(&str, &str)]) -> Result<()> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;
    // Drain the body so the connection goes back to the pool.
    response.bytes().await?;
    Ok(())
}

async fn write_worker(
    client: reqwest::Client,
    addr: String,
    iterations: usize,
) -> Result<(Stats, Vec<String>)> {
    let url = format!("http://{addr}{ENDPOINT_SET}");
    let mut keys = Vec::with_capacity(iterations);
    let mut min = Duration::MAX;
    let mut max = Duration::ZERO;
    let start = Instant::now();

    for _ in 0..iterations {
        let key = format!("key-{}", random_suffix());
        let value = format!("value-{}", random_suffix());
        let began = Instant::now();
        send(&client, &url, &[("key", key.as_str()), ("value", value.as_str())]).await?;
        let elapsed = began.elapsed();
        min = min.min(elapsed);
        max = max.max(elapsed);
        keys.push(key);
    }

    let stats = Stats {
        iterations,
        total: start.elapsed(),
        min,
        max,
    };
    stats.report("write");
    Ok((stats, keys))
}

async fn read_worker(
    client: reqwest::Client,
    addr: String,
    keys: std::sync::Arc<Vec<String>>,
    iterations: usize,
) -> Result<Stats> {
    let url = format!("http://{addr}{ENDPOINT_GET}");
    let mut min = Duration::MAX;
    let mut max = Duration::ZERO;
    let start = Instant::now();

    for _ in 0..iterations {
        let index = rand::thread_rng().gen_range(0..keys.len());
        let began = Instant::now();
        send(&client, &url, &[("key", keys[index].as_str())]).await?;
        let elapsed = began.elapsed();
        min = min.min(elapsed);
        max = max.max(elapsed);
    }

    let stats = Stats {
        iterations,
        total: start.elapsed(),
        min,
        max,
    };
    stats.report("read");
    Ok(stats)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    ensure!(args.concurrency > 0, "--concurrency must be at least 1");

    let client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(300)
        .build()?;

    println!(
        "Benchmarking http://{} | Writes: {} x {} workers | Reads: {}",
        args.addr, args.iterations, args.concurrency, args.read_iterations
    );

    let writers = (0..args.concurrency).map(|_| {
        tokio::spawn(write_worker(client.clone(), args.addr.clone(), args.iterations))
    });
    let mut keys = Vec::new();
    let mut write_qps = 0.0;
    for result in try_join_all(writers).await? {
        let (stats, written) = result?;
        write_qps += stats.qps();
        keys.extend(written);
    }
    info!("write phase complete: {write_qps:.1} QPS total, {} keys written", keys.len());

    if keys.is_empty() || args.read_iterations == 0 {
        return Ok(());
    }

    let keys = std::sync::Arc::new(keys);
    let readers = (0..args.concurrency).map(|_| {
        tokio::spawn(read_worker(
            client.clone(),
            args.addr.clone(),
            std::sync::Arc::clone(&keys),
            args.read_iterations,
        ))
    });
    let mut read_qps = 0.0;
    for result in try_join_all(readers).await? {
        read_qps += result?.qps();
    }
    info!("read phase complete: {read_qps:.1} QPS total");

    Ok(())
}
