//! Durable engine on a single redb file.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use tracing::warn;

use crate::engine::{Bucket, Engine, Entry, WriteTxn};
use crate::error::StoreError;

const DATA: TableDefinition<'static, &'static [u8], &'static [u8]> =
    TableDefinition::new("default");
const OUTBOX: TableDefinition<'static, &'static [u8], &'static [u8]> =
    TableDefinition::new("replication");

fn definition(bucket: Bucket) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match bucket {
        Bucket::Data => DATA,
        Bucket::Outbox => OUTBOX,
    }
}

/// redb-backed engine. Always opened writable; whether clients may write is
/// decided above this layer.
pub struct RedbEngine {
    db: Database,
}

impl RedbEngine {
    /// Opens the database at `path`, creating the file and both tables if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path).map_err(StoreError::engine)?;

        // Create both tables up front so first reads don't fail.
        let wtxn = db.begin_write().map_err(StoreError::engine)?;
        {
            wtxn.open_table(DATA).map_err(StoreError::engine)?;
            wtxn.open_table(OUTBOX).map_err(StoreError::engine)?;
        }
        wtxn.commit().map_err(StoreError::engine)?;

        Ok(Self { db })
    }
}

impl Engine for RedbEngine {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let rtxn = self.db.begin_read().map_err(StoreError::engine)?;
        let table = rtxn
            .open_table(definition(bucket))
            .map_err(StoreError::engine)?;
        let value = table
            .get(key)
            .map_err(StoreError::engine)?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn scan(&self, bucket: Bucket, limit: usize) -> Result<Vec<Entry>, StoreError> {
        let rtxn = self.db.begin_read().map_err(StoreError::engine)?;
        let table = rtxn
            .open_table(definition(bucket))
            .map_err(StoreError::engine)?;

        let mut entries = Vec::new();
        for item in table.iter().map_err(StoreError::engine)?.take(limit) {
            let (key, value) = item.map_err(StoreError::engine)?;
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }

    fn update(
        &self,
        f: &mut dyn FnMut(&mut dyn WriteTxn) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(StoreError::engine)?;
        let outcome = {
            let mut txn = RedbTxn {
                data: wtxn.open_table(DATA).map_err(StoreError::engine)?,
                outbox: wtxn.open_table(OUTBOX).map_err(StoreError::engine)?,
            };
            f(&mut txn)
        };

        match outcome {
            Ok(()) => wtxn.commit().map_err(StoreError::engine),
            Err(err) => {
                if let Err(abort_err) = wtxn.abort() {
                    warn!(error = %abort_err, "failed to abort write transaction");
                }
                Err(err)
            }
        }
    }
}

struct RedbTxn<'txn> {
    data: Table<'txn, &'static [u8], &'static [u8]>,
    outbox: Table<'txn, &'static [u8], &'static [u8]>,
}

impl<'txn> RedbTxn<'txn> {
    fn table(&self, bucket: Bucket) -> &Table<'txn, &'static [u8], &'static [u8]> {
        match bucket {
            Bucket::Data => &self.data,
            Bucket::Outbox => &self.outbox,
        }
    }

    fn table_mut(&mut self, bucket: Bucket) -> &mut Table<'txn, &'static [u8], &'static [u8]> {
        match bucket {
            Bucket::Data => &mut self.data,
            Bucket::Outbox => &mut self.outbox,
        }
    }
}

impl WriteTxn for RedbTxn<'_> {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .table(bucket)
            .get(key)
            .map_err(StoreError::engine)?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn keys(&self, bucket: Bucket) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut keys = Vec::new();
        for item in self.table(bucket).iter().map_err(StoreError::engine)? {
            let (key, _) = item.map_err(StoreError::engine)?;
            keys.push(key.value().to_vec());
        }
        Ok(keys)
    }

    fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.table_mut(bucket)
            .insert(key, value)
            .map_err(StoreError::engine)?;
        Ok(())
    }

    fn delete(&mut self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        self.table_mut(bucket)
            .remove(key)
            .map_err(StoreError::engine)?;
        Ok(())
    }
}
