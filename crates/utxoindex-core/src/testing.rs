//! Scriptable in-memory node and store for tests. Built with the `testing`
//! feature.
//!
//! [`MockNode`] keeps every block it ever mined (so orphaned blocks stay
//! fetchable by hash, like a real node) plus an active chain and a pending
//! pool. Forks are produced with [`MockNode::reorg_to`] followed by more
//! [`MockNode::mine`] calls. [`FaultyStore`] wraps a [`MemoryStore`] and
//! fails writes or stalls reads on demand.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{NodeError, StoreError};
use crate::memory::MemoryStore;
use crate::node::NodeClient;
use crate::store::{KvPair, KvStore, Table, WriteBatch};
use crate::types::{Block, BlockHeader, ChainTip, Transaction, TxInput, TxOutput, NULL_TXID};

#[derive(Default)]
struct State {
    blocks: HashMap<String, Block>,
    active: Vec<String>,
    pending: BTreeMap<String, Transaction>,
    mined: u64,
    fail_next: u32,
    calls: HashMap<&'static str, u32>,
}

impl State {
    fn record(&mut self, method: &'static str) -> Result<(), NodeError> {
        *self.calls.entry(method).or_default() += 1;
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(NodeError::Transient(format!("injected failure in {method}")));
        }
        Ok(())
    }

    fn active_blocks(&self) -> impl Iterator<Item = &Block> {
        self.active.iter().filter_map(|hash| self.blocks.get(hash))
    }
}

/// In-memory [`NodeClient`]. Cloning shares the same chain.
#[derive(Clone, Default)]
pub struct MockNode {
    state: Arc<Mutex<State>>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mine a block on top of the active tip containing `txs` (heights are
    /// assigned here). Mined txids leave the pending pool.
    pub fn mine(&self, txs: Vec<Transaction>) -> BlockHeader {
        let mut state = self.state.lock();
        state.mined += 1;
        let height = state.active.len() as u64;
        let parent_hash = state
            .active
            .last()
            .cloned()
            .unwrap_or_else(|| NULL_TXID.to_string());
        let header = BlockHeader {
            hash: format!("{:064x}", state.mined),
            height,
            parent_hash,
            timestamp: 1_600_000_000 + height as i64 * 600,
        };
        let transactions: Vec<Transaction> = txs
            .into_iter()
            .map(|mut tx| {
                tx.height = Some(height);
                tx
            })
            .collect();
        for tx in &transactions {
            state.pending.remove(&tx.txid);
        }
        state.active.push(header.hash.clone());
        state.blocks.insert(
            header.hash.clone(),
            Block {
                header: header.clone(),
                transactions,
            },
        );
        header
    }

    /// Drop every active block above `height`. Orphaned blocks stay
    /// fetchable by hash; their transactions do not return to the pool.
    pub fn reorg_to(&self, height: u64) {
        let mut state = self.state.lock();
        state.active.truncate(height as usize + 1);
    }

    pub fn add_pending(&self, mut tx: Transaction) {
        tx.height = None;
        self.state.lock().pending.insert(tx.txid.clone(), tx);
    }

    pub fn drop_pending(&self, txid: &str) {
        self.state.lock().pending.remove(txid);
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// How many times `method` was called.
    pub fn calls(&self, method: &str) -> u32 {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn tip_height(&self) -> Option<u64> {
        (self.state.lock().active.len() as u64).checked_sub(1)
    }

    /// Headers of the active chain, ascending.
    pub fn active_headers(&self) -> Vec<BlockHeader> {
        let state = self.state.lock();
        state.active_blocks().map(|b| b.header.clone()).collect()
    }

    /// Full blocks of the active chain, ascending.
    pub fn active_blocks(&self) -> Vec<Block> {
        let state = self.state.lock();
        state.active_blocks().cloned().collect()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn get_tip(&self) -> Result<ChainTip, NodeError> {
        let mut state = self.state.lock();
        state.record("get_tip")?;
        let hash = state
            .active
            .last()
            .cloned()
            .ok_or_else(|| NodeError::NotFound("empty chain".into()))?;
        Ok(ChainTip {
            height: state.active.len() as u64 - 1,
            hash,
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        let mut state = self.state.lock();
        state.record("get_block_hash")?;
        state
            .active
            .get(height as usize)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("block at height {height}")))
    }

    async fn get_block_header(&self, hash: &str) -> Result<BlockHeader, NodeError> {
        let mut state = self.state.lock();
        state.record("get_block_header")?;
        state
            .blocks
            .get(hash)
            .map(|b| b.header.clone())
            .ok_or_else(|| NodeError::NotFound(format!("block {hash}")))
    }

    async fn get_block(&self, hash: &str) -> Result<Block, NodeError> {
        let mut state = self.state.lock();
        state.record("get_block")?;
        state
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(format!("block {hash}")))
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, NodeError> {
        let mut state = self.state.lock();
        state.record("get_raw_transaction")?;
        if let Some(tx) = state.pending.get(txid) {
            return Ok(tx.clone());
        }
        let confirmed = state
            .active_blocks()
            .flat_map(|b| b.transactions.iter())
            .find(|tx| tx.txid == txid)
            .cloned();
        confirmed.ok_or_else(|| NodeError::NotFound(format!("transaction {txid}")))
    }

    async fn list_pending(&self) -> Result<Vec<String>, NodeError> {
        let mut state = self.state.lock();
        state.record("list_pending")?;
        Ok(state.pending.keys().cloned().collect())
    }

    async fn is_still_pending(&self, txid: &str) -> Result<bool, NodeError> {
        let mut state = self.state.lock();
        state.record("is_still_pending")?;
        Ok(state.pending.contains_key(txid))
    }

    async fn is_output_unspent(&self, txid: &str, vout: u32) -> Result<bool, NodeError> {
        let mut state = self.state.lock();
        state.record("is_output_unspent")?;
        let mut created = false;
        let mut spent = HashSet::new();
        for tx in state.active_blocks().flat_map(|b| b.transactions.iter()) {
            if tx.txid == txid && tx.outputs.iter().any(|o| o.index == vout) {
                created = true;
            }
            for input in &tx.inputs {
                spent.insert((input.prev_txid.as_str(), input.prev_index));
            }
        }
        Ok(created && !spent.contains(&(txid, vout)))
    }
}

// ─── Faulty store ─────────────────────────────────────────────────────────────

/// [`MemoryStore`] that can reject every write or delay every read.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Reject every batch with a backend error while `on`.
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Sleep `delay` before answering each read. Zero turns it off.
    pub fn stall_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn stall(&self) {
        let ms = self.read_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.stall().await;
        self.inner.get(table, key).await
    }

    async fn range(
        &self,
        table: Table,
        start: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<KvPair>, StoreError> {
        self.stall().await;
        self.inner.range(table, start, end).await
    }

    async fn first(&self, table: Table, start: &[u8], limit: usize) -> Result<Vec<KvPair>, StoreError> {
        self.stall().await;
        self.inner.first(table, start, limit).await
    }

    async fn last(&self, table: Table, limit: usize) -> Result<Vec<KvPair>, StoreError> {
        self.stall().await;
        self.inner.last(table, limit).await
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!(
                "injected write failure ({} ops)",
                batch.len()
            )));
        }
        self.inner.write(batch).await
    }
}

// ─── Builders ─────────────────────────────────────────────────────────────────

/// A fake output script that still identifies the address it pays.
pub fn script_for(address: &str) -> String {
    format!("76a914{}88ac", hex_of(address))
}

fn hex_of(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

/// Outputs paying `(address, value)` in order.
pub fn outputs(pays: &[(&str, u64)]) -> Vec<TxOutput> {
    pays.iter()
        .enumerate()
        .map(|(i, (address, value))| TxOutput {
            index: i as u32,
            address: Some(address.to_string()),
            value: *value,
            script: script_for(address),
        })
        .collect()
}

/// A coinbase transaction paying `value` to `address`.
pub fn coinbase(txid: &str, address: &str, value: u64) -> Transaction {
    Transaction {
        txid: txid.into(),
        height: None,
        inputs: vec![TxInput::coinbase()],
        outputs: outputs(&[(address, value)]),
    }
}

/// A transaction spending `spends` (`(txid, vout)`) and paying `pays`.
pub fn transfer(txid: &str, spends: &[(&str, u32)], pays: &[(&str, u64)]) -> Transaction {
    Transaction {
        txid: txid.into(),
        height: None,
        inputs: spends
            .iter()
            .map(|(prev, vout)| TxInput::new(*prev, *vout))
            .collect(),
        outputs: outputs(pays),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn orphaned_blocks_stay_fetchable() {
        let node = MockNode::new();
        node.mine(vec![coinbase("c0", "a", 1)]);
        let orphan = node.mine(vec![coinbase("c1", "a", 1)]);
        node.reorg_to(0);
        let replacement = node.mine(vec![coinbase("c1b", "a", 1)]);

        assert_eq!(node.get_tip().await.unwrap().hash, replacement.hash);
        assert_eq!(node.get_block_hash(1).await.unwrap(), replacement.hash);
        assert_eq!(node.get_block(&orphan.hash).await.unwrap().header, orphan);
        assert!(node.get_block_hash(2).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn mining_clears_pending_and_tracks_spends() {
        let node = MockNode::new();
        node.mine(vec![coinbase("c0", "a", 50)]);
        node.add_pending(transfer("t1", &[("c0", 0)], &[("b", 50)]));
        assert!(node.is_still_pending("t1").await.unwrap());
        assert!(node.is_output_unspent("c0", 0).await.unwrap());

        node.mine(vec![transfer("t1", &[("c0", 0)], &[("b", 50)])]);
        assert!(!node.is_still_pending("t1").await.unwrap());
        assert!(!node.is_output_unspent("c0", 0).await.unwrap());
        assert!(node.is_output_unspent("t1", 0).await.unwrap());
    }

    #[tokio::test]
    async fn confirmed_transactions_are_found_by_txid() {
        let node = MockNode::new();
        node.mine(vec![coinbase("c0", "a", 1)]);
        let tx = node.get_raw_transaction("c0").await.unwrap();
        assert_eq!(tx.height, Some(0));
        assert!(node.get_raw_transaction("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn faulty_store_rejects_writes_until_cleared() {
        let store = FaultyStore::new();
        store.fail_writes(true);
        let err = store.put(Table::Headers, b"k".to_vec(), b"v".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.inner().count(Table::Headers), 0);

        store.fail_writes(false);
        store.put(Table::Headers, b"k".to_vec(), b"v".to_vec()).await.unwrap();
        assert_eq!(store.get(Table::Headers, b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let node = MockNode::new();
        node.mine(vec![]);
        node.fail_next(1);
        assert!(node.get_tip().await.unwrap_err().is_retryable());
        assert!(node.get_tip().await.is_ok());
        assert_eq!(node.calls("get_tip"), 2);
    }
}
