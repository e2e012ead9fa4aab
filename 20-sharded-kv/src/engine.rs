//! Narrow interface over the single-node storage engine.
//!
//! The local store only needs keyed reads, an ordered scan, and atomic
//! multi-key writes across two buckets. Keeping the seam this small lets the
//! same store logic run on [`MemoryEngine`] in tests and on the durable
//! [`RedbEngine`](crate::durable::RedbEngine) in production.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::error::StoreError;

/// Key/value pair as stored by the engine.
pub type Entry = (Vec<u8>, Vec<u8>);

/// Independent keyspaces kept by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// Primary key/value data served to clients.
    Data,
    /// Pending replication entries, keyed by application key.
    Outbox,
}

/// View handed to [`Engine::update`]. Reads observe the transaction's own
/// uncommitted writes.
pub trait WriteTxn {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>, StoreError>;
    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&mut self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError>;
}

/// Ordered, transactional key/value engine.
pub trait Engine: Send + Sync {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns up to `limit` entries in ascending key order.
    fn scan(&self, bucket: Bucket, limit: usize) -> Result<Vec<Entry>, StoreError>;

    /// Runs `f` in one write transaction. Its writes become visible together
    /// if it returns `Ok`, and are discarded otherwise.
    fn update(
        &self,
        f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Tables {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    outbox: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Tables {
    fn bucket(&self, bucket: Bucket) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        match bucket {
            Bucket::Data => &self.data,
            Bucket::Outbox => &self.outbox,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut BTreeMap<Vec<u8>, Vec<u8>> {
        match bucket {
            Bucket::Data => &mut self.data,
            Bucket::Outbox => &mut self.outbox,
        }
    }
}

/// Engine backed by ordered in-memory maps. Nothing survives the process.
#[derive(Default)]
pub struct MemoryEngine {
    tables: Mutex<Tables>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::engine("memory engine lock poisoned"))
    }
}

impl Engine for MemoryEngine {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.bucket(bucket).get(key).cloned())
    }

    fn scan(&self, bucket: Bucket, limit: usize) -> Result<Vec<Entry>, StoreError> {
        Ok(self
            .lock()?
            .bucket(bucket)
            .iter()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn update(
        &self,
        f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        // The lock is held for the whole transaction, so writers are serialized
        // and readers never see a half-applied batch.
        let mut tables = self.lock()?;
        let staged = {
            let mut txn = MemoryTxn {
                tables: &tables,
                staged: BTreeMap::new(),
            };
            f(&mut txn)?;
            txn.staged
        };

        for ((bucket, key), value) in staged {
            let table = tables.bucket_mut(bucket);
            match value {
                Some(value) => {
                    table.insert(key, value);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
        Ok(())
    }
}

struct MemoryTxn<'a> {
    tables: &'a Tables,
    // None marks a delete.
    staged: BTreeMap<(Bucket, Vec<u8>), Option<Vec<u8>>>,
}

impl WriteTxn for MemoryTxn<'_> {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.staged.get(&(bucket, key.to_vec())) {
            return Ok(staged.clone());
        }
        Ok(self.tables.bucket(bucket).get(key).cloned())
    }

    fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut keys: BTreeSet<Vec<u8>> = self.tables.bucket(bucket).keys().cloned().collect();
        for ((staged_bucket, key), value) in &self.staged {
            if *staged_bucket != bucket {
                continue;
            }
            if value.is_some() {
                keys.insert(key.clone());
            } else {
                keys.remove(key);
            }
        }
        Ok(keys.into_iter().collect())
    }

    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.staged
            .insert((bucket, key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        self.staged.insert((bucket, key.to_vec()), None);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Behaviour every engine must share. Also run against the durable engine.
    pub(crate) fn check_engine_contract(engine: &dyn Engine) {
        engine
            .update(&mut |txn| {
                txn.put(Bucket::Data, b"b", b"2")?;
                txn.put(Bucket::Data, b"a", b"1")?;
                txn.put(Bucket::Outbox, b"a", b"1")
            })
            .unwrap();

        assert_eq!(engine.get(Bucket::Data, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(Bucket::Outbox, b"b").unwrap(), None);

        let scanned = engine.scan(Bucket::Data, usize::MAX).unwrap();
        assert_eq!(
            scanned,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
        assert_eq!(engine.scan(Bucket::Data, 1).unwrap().len(), 1);

        // A failing transaction leaves no trace.
        let result = engine.update(&mut |txn| {
            txn.put(Bucket::Data, b"c", b"3")?;
            txn.delete(Bucket::Data, b"a")?;
            Err(StoreError::engine("boom"))
        });
        assert!(result.is_err());
        assert_eq!(engine.get(Bucket::Data, b"c").unwrap(), None);
        assert_eq!(engine.get(Bucket::Data, b"a").unwrap(), Some(b"1".to_vec()));

        // Reads inside a transaction see its own writes.
        engine
            .update(&mut |txn| {
                txn.delete(Bucket::Data, b"a")?;
                txn.put(Bucket::Data, b"z", b"26")?;
                assert_eq!(txn.get(Bucket::Data, b"a")?, None);
                assert_eq!(txn.get(Bucket::Data, b"z")?, Some(b"26".to_vec()));
                assert_eq!(txn.keys(Bucket::Data)?, vec![b"b".to_vec(), b"z".to_vec()]);
                Ok(())
            })
            .unwrap();
        assert_eq!(engine.get(Bucket::Data, b"a").unwrap(), None);
    }

    #[test]
    fn memory_engine_honours_contract() {
        check_engine_contract(&MemoryEngine::new());
    }

    #[test]
    fn buckets_are_independent() {
        let engine = MemoryEngine::new();
        engine
            .update(&mut |txn| txn.put(Bucket::Outbox, b"k", b"v"))
            .unwrap();
        assert!(engine.scan(Bucket::Data, usize::MAX).unwrap().is_empty());
        assert_eq!(engine.scan(Bucket::Outbox, usize::MAX).unwrap().len(), 1);
    }
}
