//! In-memory [`KvStore`] for tests and ephemeral indexers.
//!
//! All data is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::{BatchOp, KvPair, KvStore, Table, WriteBatch};

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// BTreeMap-per-table store. A batch is applied under one write lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, TableMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full copy of every table, for byte-for-byte state comparisons.
    pub fn snapshot(&self) -> BTreeMap<Table, Vec<KvPair>> {
        let tables = self.tables.read();
        Table::ALL
            .iter()
            .map(|table| {
                let rows = tables
                    .get(table)
                    .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                (*table, rows)
            })
            .collect()
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: Table) -> usize {
        self.tables.read().get(&table).map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.read().get(&table).and_then(|t| t.get(key).cloned()))
    }

    async fn range(
        &self,
        table: Table,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<KvPair>, StoreError> {
        let tables = self.tables.read();
        let Some(map) = tables.get(&table) else {
            return Ok(vec![]);
        };
        let upper = match end {
            Some(end) if end <= start => return Ok(vec![]),
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Ok(map
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn first(&self, table: Table, start: &[u8], limit: usize) -> Result<Vec<KvPair>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .get(&table)
            .map(|t| {
                t.range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
                    .take(limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last(&self, table: Table, limit: usize) -> Result<Vec<KvPair>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .get(&table)
            .map(|t| {
                t.iter()
                    .rev()
                    .take(limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { table, key, value } => {
                    tables.entry(table).or_default().insert(key, value);
                }
                BatchOp::Delete { table, key } => {
                    if let Some(t) = tables.get_mut(&table) {
                        t.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
