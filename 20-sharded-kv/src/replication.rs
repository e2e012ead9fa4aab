//! Pull-based, asynchronous leader → replica replication.
//!
//! The leader side is two thin endpoints over its outbox (see
//! [`crate::router`]). This module is the replica side: a single long-lived
//! task that repeatedly
//!
//! 1. asks the leader for the next pending entry,
//! 2. applies it locally with [`Store::put_from_replication`],
//! 3. acknowledges it so the leader can drop it from the outbox.
//!
//! Nothing is acknowledged before it is applied, so a crash anywhere in the
//! cycle leaves the entry queued on the leader and it is applied again later.
//! Reapplying is harmless because it is a last-value overwrite. Delivery is
//! at-least-once; there is no ordering between different keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::ReplicationError;
use crate::protocol::{
    ACK_OK, ENDPOINT_DELETE_REPLICATION_KEY, ENDPOINT_NEXT_REPLICATION_KEY, NextEntry,
};
use crate::store::Store;

/// Timing knobs for the polling loop.
#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    /// Attempts at reaching the leader within one fetch.
    pub max_fetch_attempts: u32,
    /// Pause between those attempts.
    pub fetch_retry_delay: Duration,
    /// Pause after a failed cycle before starting over.
    pub cycle_backoff: Duration,
    /// Pause after the leader reported an empty outbox.
    pub idle_delay: Duration,
    /// Per-request timeout for calls to the leader.
    pub request_timeout: Duration,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            max_fetch_attempts: 10,
            fetch_retry_delay: Duration::from_secs(1),
            cycle_backoff: Duration::from_secs(1),
            idle_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// States of the polling loop. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    /// Outbox was observed empty; waiting before the next fetch.
    Idle,
    /// About to ask the leader for the next entry.
    Fetching,
}

/// Result of one successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// An entry was applied locally (and an acknowledgement was attempted).
    Applied { key: String },
    /// The leader had nothing pending.
    Empty,
}

/// What the loop does after a cycle: the next state and how long to wait
/// before entering it.
pub fn transition(
    outcome: &Result<Cycle, ReplicationError>,
    settings: &ReplicationSettings,
) -> (ReplicaState, Option<Duration>) {
    match outcome {
        // Drain bursts without pausing.
        Ok(Cycle::Applied { .. }) => (ReplicaState::Fetching, None),
        Ok(Cycle::Empty) => (ReplicaState::Idle, None),
        Err(_) => (ReplicaState::Fetching, Some(settings.cycle_backoff)),
    }
}

/// Replica-side client that mirrors one leader into the local store.
pub struct ReplicaClient {
    store: Arc<Store>,
    leader: String,
    http: reqwest::Client,
    settings: ReplicationSettings,
}

impl ReplicaClient {
    pub fn new(
        store: Arc<Store>,
        leader: impl Into<String>,
        settings: ReplicationSettings,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            store,
            leader: leader.into(),
            http,
            settings,
        })
    }

    pub fn leader(&self) -> &str {
        &self.leader
    }

    /// Polls the leader for the lifetime of the process.
    pub async fn run(self) {
        info!(leader = %self.leader, "starting replication loop");
        let mut state = ReplicaState::Fetching;
        loop {
            match state {
                ReplicaState::Idle => {
                    sleep(self.settings.idle_delay).await;
                    state = ReplicaState::Fetching;
                }
                ReplicaState::Fetching => {
                    let outcome = self.poll_once().await;
                    if let Err(err) = &outcome {
                        warn!(leader = %self.leader, error = %err, "replication cycle failed");
                    }
                    let (next, pause) = transition(&outcome, &self.settings);
                    if let Some(pause) = pause {
                        sleep(pause).await;
                    }
                    state = next;
                }
            }
        }
    }

    /// Runs one fetch → apply → acknowledge cycle.
    ///
    /// Acknowledgement failures are only logged: the entry is already applied
    /// and will at worst be delivered again.
    pub async fn poll_once(&self) -> Result<Cycle, ReplicationError> {
        let next = self.fetch_next().await?;
        if next.is_empty() && next.error.is_none() {
            return Ok(Cycle::Empty);
        }
        let NextEntry { key, value, error } = next;
        if let Some(error) = error {
            return Err(ReplicationError::Leader(error));
        }

        let (apply_key, apply_value) = (key.clone(), value.clone());
        self.store
            .call(move |store| store.put_from_replication(&apply_key, apply_value.as_bytes()))
            .await
            .map_err(|source| ReplicationError::Apply {
                key: key.clone(),
                source,
            })?;
        debug!(%key, "applied replicated entry");

        if let Err(err) = self.acknowledge(&key, &value).await {
            warn!(%key, error = %err, "failed to remove key from leader's replication queue");
        }

        Ok(Cycle::Applied { key })
    }

    /// Asks the leader for its next outbox entry, retrying transport failures.
    async fn fetch_next(&self) -> Result<NextEntry, ReplicationError> {
        let url = format!("http://{}{}", self.leader, ENDPOINT_NEXT_REPLICATION_KEY);
        let max_attempts = self.settings.max_fetch_attempts.max(1);

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.http.get(&url).send().await {
                Ok(response) => break response,
                Err(source) if attempt >= max_attempts => {
                    return Err(ReplicationError::LeaderUnreachable {
                        leader: self.leader.clone(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    warn!(
                        leader = %self.leader,
                        attempt,
                        max_attempts,
                        error = %err,
                        "could not connect to leader"
                    );
                    sleep(self.settings.fetch_retry_delay).await;
                }
            }
        };

        response
            .json::<NextEntry>()
            .await
            .map_err(ReplicationError::Decode)
    }

    /// Tells the leader `(key, value)` has been applied. The leader only
    /// drops the entry if it still holds exactly this value.
    async fn acknowledge(&self, key: &str, value: &str) -> Result<(), ReplicationError> {
        let url = format!("http://{}{}", self.leader, ENDPOINT_DELETE_REPLICATION_KEY);
        let response = self
            .http
            .get(&url)
            .query(&[("key", key), ("value", value)])
            .send()
            .await
            .map_err(ReplicationError::AcknowledgeTransport)?;
        let body = response
            .text()
            .await
            .map_err(ReplicationError::AcknowledgeTransport)?;

        if body != ACK_OK {
            return Err(ReplicationError::Acknowledge(body));
        }
        Ok(())
    }
}
