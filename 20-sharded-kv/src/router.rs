//! HTTP request router.
//!
//! Every client verb starts by partitioning the key. Keys owned by the local
//! shard are served from the [`Store`]; anything else is forwarded once, as
//! is, to the node listed for the owning shard and the remote answer is
//! relayed back unchanged. Forwarding failures are returned to the caller and
//! never retried here.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::{RouterError, StoreError};
use crate::protocol::{
    ACK_OK, ENDPOINT_DELETE_REPLICATION_KEY, ENDPOINT_GET, ENDPOINT_HEALTH,
    ENDPOINT_NEXT_REPLICATION_KEY, ENDPOINT_PURGE, ENDPOINT_SET, GetResponse, KeyParams,
    KeyValueParams, NextEntry, PurgeResponse, SetResponse,
};
use crate::store::Store;
use crate::topology::ShardTopology;

/// Connect timeout for forwarded requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared, read-only state behind every handler.
#[derive(Clone)]
pub struct AppState {
    topology: Arc<ShardTopology>,
    store: Arc<Store>,
    client: reqwest::Client,
    label: Arc<str>,
}

/// Where a key's request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Local { shard: usize },
    Remote { shard: usize, address: &'a str },
}

impl AppState {
    pub fn new(
        topology: ShardTopology,
        store: Arc<Store>,
        label: impl Into<Arc<str>>,
        forward_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(forward_timeout)
            .build()?;
        Ok(Self {
            topology: Arc::new(topology),
            store,
            client,
            label: label.into(),
        })
    }

    pub fn topology(&self) -> &ShardTopology {
        &self.topology
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn route(&self, key: &str) -> Route<'_> {
        let shard = self.topology.partition(key);
        if shard == self.topology.current_index() {
            return Route::Local { shard };
        }
        // partition() only yields indices the topology has validated.
        let address = self.topology.address(shard).unwrap_or_default();
        Route::Remote { shard, address }
    }

    /// Replays `uri` against `address` and relays status, content type and
    /// body verbatim.
    async fn forward(
        &self,
        shard: usize,
        address: &str,
        uri: &Uri,
    ) -> Result<Response, RouterError> {
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        let url = format!("http://{address}{path}");
        debug!(
            node = %self.label,
            from = self.topology.current_index(),
            to = shard,
            %url,
            "forwarding request"
        );

        let forward_error = |source| RouterError::Forward {
            shard,
            address: address.to_string(),
            source,
        };
        let remote = self.client.get(&url).send().await.map_err(forward_error)?;
        let status = remote.status();
        let content_type = remote.headers().get(CONTENT_TYPE).cloned();
        let body: Bytes = remote.bytes().await.map_err(forward_error)?;

        let mut response = (status, body).into_response();
        match content_type {
            Some(content_type) => {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            None => {
                response.headers_mut().remove(CONTENT_TYPE);
            }
        }
        Ok(response)
    }
}

/// Builds the node's HTTP surface.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route(ENDPOINT_GET, get(handle_get))
        .route(ENDPOINT_SET, get(handle_set))
        .route(ENDPOINT_PURGE, get(handle_purge))
        .route(ENDPOINT_NEXT_REPLICATION_KEY, get(next_replication_key))
        .route(ENDPOINT_DELETE_REPLICATION_KEY, get(delete_replication_key))
        .route(ENDPOINT_HEALTH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_get(
    State(state): State<AppState>,
    uri: Uri,
    Query(KeyParams { key }): Query<KeyParams>,
) -> Result<Response, RouterError> {
    if key.is_empty() {
        return Err(StoreError::EmptyKey.into());
    }
    let shard = match state.route(&key) {
        Route::Remote { shard, address } => return state.forward(shard, address, &uri).await,
        Route::Local { shard } => shard,
    };

    let lookup = key.clone();
    let value = state
        .store
        .call(move |store| store.get(&lookup))
        .await
        .inspect_err(|err| error!(node = %state.label, %key, error = %err, "get failed"))?;

    Ok(Json(GetResponse {
        shard,
        key,
        value: value.map(|v| String::from_utf8_lossy(&v).into_owned()),
    })
    .into_response())
}

async fn handle_set(
    State(state): State<AppState>,
    uri: Uri,
    Query(KeyValueParams { key, value }): Query<KeyValueParams>,
) -> Result<Response, RouterError> {
    if key.is_empty() {
        return Err(StoreError::EmptyKey.into());
    }
    let shard = match state.route(&key) {
        Route::Remote { shard, address } => return state.forward(shard, address, &uri).await,
        Route::Local { shard } => shard,
    };

    let write_key = key.clone();
    state
        .store
        .call(move |store| store.put(&write_key, value.as_bytes()))
        .await
        .inspect_err(|err| error!(node = %state.label, %key, error = %err, "set failed"))?;

    Ok(Json(SetResponse { shard, key }).into_response())
}

async fn handle_purge(State(state): State<AppState>) -> Result<Json<PurgeResponse>, RouterError> {
    let topology = Arc::clone(&state.topology);
    let purged = state
        .store
        .call(move |store| store.purge_where(|key| !topology.owns(key)))
        .await
        .inspect_err(|err| error!(node = %state.label, error = %err, "purge failed"))?;

    info!(node = %state.label, purged, "purged keys owned by other shards");
    Ok(Json(PurgeResponse { purged }))
}

// Polled continuously by replicas, so successful calls are not logged.
async fn next_replication_key(State(state): State<AppState>) -> Json<NextEntry> {
    let entry = match state.store.call(|store| store.peek_outbox()).await {
        Ok(Some(entry)) => {
            NextEntry::pending(entry.key, String::from_utf8_lossy(&entry.value).into_owned())
        }
        Ok(None) => NextEntry::default(),
        Err(err) => {
            error!(node = %state.label, error = %err, "failed to read replication outbox");
            NextEntry::failed(err.to_string())
        }
    };
    Json(entry)
}

async fn delete_replication_key(
    State(state): State<AppState>,
    Query(KeyValueParams { key, value }): Query<KeyValueParams>,
) -> Response {
    let ack_key = key.clone();
    match state
        .store
        .call(move |store| store.acknowledge(&ack_key, value.as_bytes()))
        .await
    {
        Ok(removed) => {
            debug!(node = %state.label, %key, removed, "replication acknowledgement");
            ACK_OK.into_response()
        }
        Err(err) => {
            error!(node = %state.label, %key, error = %err, "replication delete failed");
            (StatusCode::EXPECTATION_FAILED, format!("error: {err}")).into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> String {
    format!("ok {}", state.label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::store::ClientWrites;
    use crate::topology::ShardDescriptor;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(current: &str, client_writes: ClientWrites) -> AppState {
        let shards = vec![
            ShardDescriptor::new("A", 0, "127.0.0.1:1"),
            ShardDescriptor::new("B", 1, "127.0.0.1:2"),
        ];
        let topology = ShardTopology::new(&shards, current).unwrap();
        let store = Arc::new(Store::new(MemoryEngine::new(), client_writes));
        AppState::new(topology, store, current, Duration::from_secs(1)).unwrap()
    }

    async fn call(app: &Router, uri: &str) -> (StatusCode, Bytes) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    #[test]
    fn routes_by_partition() {
        let state = state("A", ClientWrites::Accept);
        // fnv1a("a") is even, fnv1a("x") is odd.
        assert_eq!(state.route("a"), Route::Local { shard: 0 });
        assert_eq!(
            state.route("x"),
            Route::Remote {
                shard: 1,
                address: "127.0.0.1:2"
            }
        );
    }

    #[tokio::test]
    async fn local_set_then_get() {
        let app = build(state("A", ClientWrites::Accept));

        let (status, body) = call(&app, "/set?key=a&value=b").await;
        assert_eq!(status, StatusCode::OK);
        let set: SetResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(set, SetResponse { shard: 0, key: "a".into() });

        let (status, body) = call(&app, "/get?key=a").await;
        assert_eq!(status, StatusCode::OK);
        let got: GetResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(got.value.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn missing_key_is_explicit_not_an_error() {
        let app = build(state("A", ClientWrites::Accept));
        let (status, body) = call(&app, "/get?key=k").await;
        assert_eq!(status, StatusCode::OK);
        let got: GetResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(got.value, None);
    }

    #[tokio::test]
    async fn empty_key_is_a_bad_request_on_any_node() {
        let state = state("A", ClientWrites::Accept);
        let app = build(state.clone());

        let (status, body) = call(&app, "/set?key=&value=x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("key must not be empty"));
        let (status, _) = call(&app, "/get?key=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.store().outbox_len().unwrap(), 0);

        // Later writes still reach the replication queue.
        call(&app, "/set?key=a&value=b").await;
        let (_, body) = call(&app, "/next-replication-key").await;
        let next: NextEntry = serde_json::from_slice(&body).unwrap();
        assert_eq!(next, NextEntry::pending("a".into(), "b".into()));
    }

    #[tokio::test]
    async fn replica_rejects_client_set() {
        let app = build(state("A", ClientWrites::Refuse));
        let (status, body) = call(&app, "/set?key=a&value=b").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(String::from_utf8_lossy(&body).contains("does not accept client writes"));
    }

    #[tokio::test]
    async fn unreachable_owner_is_reported_to_caller() {
        // Shard 1 lives on a port nothing listens on.
        let app = build(state("A", ClientWrites::Accept));
        let (status, body) = call(&app, "/get?key=x").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(String::from_utf8_lossy(&body).contains("error forwarding request to shard 1"));
    }

    #[tokio::test]
    async fn purge_drops_foreign_keys() {
        let state = state("A", ClientWrites::Accept);
        // Plant keys directly, bypassing routing.
        state.store().put("a", b"1").unwrap();
        state.store().put("x", b"2").unwrap();
        let app = build(state.clone());

        let (_, body) = call(&app, "/purge").await;
        let purged: PurgeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(purged.purged, 1);
        assert_eq!(state.store().get("x").unwrap(), None);
        assert_eq!(state.store().get("a").unwrap(), Some(b"1".to_vec()));
        // "x" is no longer offered to this shard's replicas.
        assert_eq!(state.store().outbox_len().unwrap(), 1);

        let (_, body) = call(&app, "/purge").await;
        let purged: PurgeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(purged.purged, 0);
        assert_eq!(state.store().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn replication_endpoints_peek_and_acknowledge() {
        let state = state("A", ClientWrites::Accept);
        let app = build(state.clone());

        let (_, body) = call(&app, "/next-replication-key").await;
        let next: NextEntry = serde_json::from_slice(&body).unwrap();
        assert!(next.is_empty());
        assert_eq!(next.error, None);

        call(&app, "/set?key=a&value=b").await;
        let (_, body) = call(&app, "/next-replication-key").await;
        let next: NextEntry = serde_json::from_slice(&body).unwrap();
        assert_eq!(next, NextEntry::pending("a".into(), "b".into()));

        // Stale value: acknowledged as ok but nothing is removed.
        let (status, body) = call(&app, "/delete-replication-key?key=a&value=old").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], ACK_OK.as_bytes());
        assert_eq!(state.store().outbox_len().unwrap(), 1);

        let (_, body) = call(&app, "/delete-replication-key?key=a&value=b").await;
        assert_eq!(&body[..], ACK_OK.as_bytes());
        assert_eq!(state.store().outbox_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn health_reports_label() {
        let app = build(state("B", ClientWrites::Accept));
        let (status, body) = call(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ok B");
    }
}
