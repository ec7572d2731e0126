//! Ordered key-value contract backing the index tables.
//!
//! Backends only need put/get/range/delete and an atomic multi-key batch.
//! Everything the engine writes for one block (or one whole reorg plan) goes
//! through a single [`WriteBatch`], so readers observe all of it or none of it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StoreError;

/// Logical tables. Each is an independent ordered keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// height → [`BlockHeader`](crate::types::BlockHeader)
    Headers,
    /// (address, height, txid) → ()
    History,
    /// (address, txid, vout) → value, script, height
    Unspent,
    /// (txid, vout) → address; locates the unspent row an input consumes
    Outpoints,
    /// txid → confirmation height
    TxHeights,
    /// height → what the block consumed and created, for rollback
    Undo,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Headers,
        Table::History,
        Table::Unspent,
        Table::Outpoints,
        Table::TxHeights,
        Table::Undo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::History => "history",
            Self::Unspent => "unspent",
            Self::Outpoints => "outpoints",
            Self::TxHeights => "tx_heights",
            Self::Undo => "undo",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        table: Table,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: Vec<u8>,
    },
}

/// An ordered list of mutations applied atomically by [`KvStore::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { table, key, value });
    }

    pub fn delete(&mut self, table: Table, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { table, key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// A key/value pair returned by range scans.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Ordered key-value store. Must be durable for production backends.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Entries with `start <= key < end` in ascending key order.
    /// `end == None` scans to the end of the table.
    async fn range(
        &self,
        table: Table,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<KvPair>, StoreError>;

    /// At most `limit` entries with `start <= key`, in ascending key order.
    async fn first(&self, table: Table, start: &[u8], limit: usize) -> Result<Vec<KvPair>, StoreError>;

    /// The last `limit` entries of a table, highest key first.
    async fn last(&self, table: Table, limit: usize) -> Result<Vec<KvPair>, StoreError>;

    /// Apply every op in `batch` atomically.
    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn put(&self, table: Table, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(table, key, value);
        self.write(batch).await
    }

    async fn delete(&self, table: Table, key: Vec<u8>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(table, key);
        self.write(batch).await
    }

    /// All entries whose key starts with `prefix`.
    async fn scan_prefix(&self, table: Table, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError> {
        let end = prefix_end(prefix);
        self.range(table, prefix, end.as_deref()).await
    }
}

/// Smallest key strictly greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

// ─── Staged writes ────────────────────────────────────────────────────────────

/// Accumulates a batch while letting later steps read their own writes.
///
/// Used to stage a whole reorg plan (rollbacks then applies) against the
/// committed state and submit it as one batch.
pub struct StagedWrites<'a> {
    base: &'a dyn KvStore,
    overlay: HashMap<(Table, Vec<u8>), Option<Vec<u8>>>,
    batch: WriteBatch,
}

impl<'a> StagedWrites<'a> {
    pub fn new(base: &'a dyn KvStore) -> Self {
        Self {
            base,
            overlay: HashMap::new(),
            batch: WriteBatch::new(),
        }
    }

    pub async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.overlay.get(&(table, key.to_vec())) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.get(table, key).await,
        }
    }

    pub fn put(&mut self, table: Table, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert((table, key.clone()), Some(value.clone()));
        self.batch.put(table, key, value);
    }

    pub fn delete(&mut self, table: Table, key: Vec<u8>) {
        self.overlay.insert((table, key.clone()), None);
        self.batch.delete(table, key);
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn into_batch(self) -> WriteBatch {
        self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn prefix_end_increments_last_byte() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
    }

    #[tokio::test]
    async fn staged_reads_see_own_writes() {
        let store = MemoryStore::new();
        store.put(Table::Outpoints, b"k1".to_vec(), b"v1".to_vec()).await.unwrap();

        let mut staged = StagedWrites::new(&store);
        assert_eq!(staged.get(Table::Outpoints, b"k1").await.unwrap(), Some(b"v1".to_vec()));

        staged.delete(Table::Outpoints, b"k1".to_vec());
        staged.put(Table::Outpoints, b"k2".to_vec(), b"v2".to_vec());
        assert_eq!(staged.get(Table::Outpoints, b"k1").await.unwrap(), None);
        assert_eq!(staged.get(Table::Outpoints, b"k2").await.unwrap(), Some(b"v2".to_vec()));

        // Nothing reaches the store until the batch is written.
        assert!(store.get(Table::Outpoints, b"k2").await.unwrap().is_none());
        let batch = staged.into_batch();
        assert_eq!(batch.len(), 2);
        store.write(batch).await.unwrap();
        assert!(store.get(Table::Outpoints, b"k1").await.unwrap().is_none());
        assert!(store.get(Table::Outpoints, b"k2").await.unwrap().is_some());
    }
}
