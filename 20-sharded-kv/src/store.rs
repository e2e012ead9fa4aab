//! Local store: primary data plus the replication outbox.
//!
//! Every client write updates the data bucket and the outbox entry for the
//! same key in one engine transaction. The outbox is keyed by the application
//! key, so a newer write replaces a pending older one and replicas only ever
//! see the latest value. Entries leave the outbox through
//! [`Store::acknowledge`], which only deletes when the caller presents the
//! exact value it was given.
//!
//! Empty keys are rejected on every write path. An empty key in the outbox
//! would be indistinguishable from "nothing pending" on the wire.

use std::sync::Arc;

use crate::engine::{Bucket, Engine};
use crate::error::StoreError;

/// Application-level gate on client writes, independent of the engine's
/// own open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientWrites {
    Accept,
    Refuse,
}

/// Pending replication entry handed out by [`Store::peek_outbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub key: String,
    pub value: Vec<u8>,
}

pub struct Store {
    engine: Box<dyn Engine>,
    client_writes: ClientWrites,
}

impl Store {
    pub fn new(engine: impl Engine + 'static, client_writes: ClientWrites) -> Self {
        Self {
            engine: Box::new(engine),
            client_writes,
        }
    }

    pub fn accepts_client_writes(&self) -> bool {
        self.client_writes == ClientWrites::Accept
    }

    /// Current value for `key`, or `None` if it was never written.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.engine.get(Bucket::Data, key.as_bytes())
    }

    /// Client write. Queues `(key, value)` for replication, replacing any
    /// pending entry for the same key.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if !self.accepts_client_writes() {
            return Err(StoreError::ReadOnly);
        }
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        self.engine.update(&mut |txn| {
            txn.put(Bucket::Data, key.as_bytes(), value)?;
            txn.put(Bucket::Outbox, key.as_bytes(), value)
        })
    }

    /// Write that arrived through replication. Never touches the outbox and
    /// ignores the client write gate.
    pub fn put_from_replication(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        self.engine
            .update(&mut |txn| txn.put(Bucket::Data, key.as_bytes(), value))
    }

    /// One pending outbox entry, without removing it.
    pub fn peek_outbox(&self) -> Result<Option<OutboxEntry>, StoreError> {
        let Some((key, value)) = self.engine.scan(Bucket::Outbox, 1)?.into_iter().next() else {
            return Ok(None);
        };
        let key = String::from_utf8(key).map_err(StoreError::engine)?;
        Ok(Some(OutboxEntry { key, value }))
    }

    /// Removes the outbox entry for `key` only if it still holds `value`.
    ///
    /// Returns `Ok(false)` when the entry is gone or was overwritten since the
    /// caller read it; the newer value then stays queued.
    pub fn acknowledge(&self, key: &str, value: &[u8]) -> Result<bool, StoreError> {
        let mut removed = false;
        self.engine.update(&mut |txn| {
            removed = false;
            match txn.get(Bucket::Outbox, key.as_bytes())? {
                Some(current) if current == value => {
                    txn.delete(Bucket::Outbox, key.as_bytes())?;
                    removed = true;
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(removed)
    }

    /// Deletes every data key for which `predicate` holds and returns how many
    /// were removed. Pending outbox entries for those keys go in the same
    /// transaction, so nothing purged here is replicated afterwards.
    pub fn purge_where(
        &self,
        mut predicate: impl FnMut(&str) -> bool,
    ) -> Result<usize, StoreError> {
        let mut purged = 0;
        self.engine.update(&mut |txn| {
            purged = 0;
            for key in txn.keys(Bucket::Data)? {
                if predicate(&String::from_utf8_lossy(&key)) {
                    txn.delete(Bucket::Data, &key)?;
                    purged += 1;
                }
            }
            for key in txn.keys(Bucket::Outbox)? {
                if predicate(&String::from_utf8_lossy(&key)) {
                    txn.delete(Bucket::Outbox, &key)?;
                }
            }
            Ok(())
        })?;
        Ok(purged)
    }

    /// Number of keys in the data bucket.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.engine.scan(Bucket::Data, usize::MAX)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.engine.scan(Bucket::Data, 1)?.is_empty())
    }

    /// Number of entries still waiting to be replicated.
    pub fn outbox_len(&self) -> Result<usize, StoreError> {
        Ok(self.engine.scan(Bucket::Outbox, usize::MAX)?.len())
    }

    /// Runs a store operation on the blocking pool so engine I/O never stalls
    /// the async runtime.
    pub async fn call<T, F>(self: &Arc<Self>, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|err| StoreError::engine(format!("store task failed: {err}")))?
    }
}
