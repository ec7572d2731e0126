//! Block/transaction applier — turns blocks into index mutations and
//! commits them as one atomic batch; undoes them the same way.
//!
//! Ordering rules that keep a txid in at most one of {pending, confirmed}
//! for readers:
//! - confirmation removes the pending entries only after the block batch
//!   commits, inside the same write section;
//! - demotion re-inserts pending entries only *after* the rollback commits.
//!
//! Undo records are kept for the last `window_size` heights only. Applying
//! height `h` deletes `Undo[h - window_size]` in the same batch.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{StoreError, SyncError};
use crate::keys::{self, UndoRecord, UnspentValue};
use crate::mempool::MempoolStore;
use crate::node::NodeClient;
use crate::pointer::LatestCell;
use crate::reorg::ReorgPlan;
use crate::retry::RetryPolicy;
use crate::store::{KvStore, StagedWrites, Table};
use crate::types::{Block, BlockHeader, LatestPointer, MempoolEntry, Transaction, UnspentEntry};

/// Result of committing one or more blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// Headers now applied, ascending.
    pub applied: Vec<BlockHeader>,
    /// Heights rolled back, descending.
    pub rolled_back: Vec<u64>,
    /// Txids that lost confirmation and were not re-confirmed by the same commit.
    pub unconfirmed: Vec<String>,
}

/// Applies blocks and pending transactions to the index and mempool stores.
pub struct Applier {
    store: Arc<dyn KvStore>,
    mempool: Arc<MempoolStore>,
    latest: Arc<LatestCell>,
    retry: RetryPolicy,
    window_size: usize,
}

impl Applier {
    pub fn new(
        store: Arc<dyn KvStore>,
        mempool: Arc<MempoolStore>,
        latest: Arc<LatestCell>,
        retry: RetryPolicy,
        window_size: usize,
    ) -> Self {
        Self {
            store,
            mempool,
            latest,
            retry,
            window_size: window_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn mempool(&self) -> &Arc<MempoolStore> {
        &self.mempool
    }

    /// Apply one block on top of the current tip and publish it as latest.
    ///
    /// Re-applying the block already stored at that height is a no-op.
    pub async fn apply_block(&self, block: &Block) -> Result<Committed, SyncError> {
        let mut staged = StagedWrites::new(self.store.as_ref());
        let Some(undo) = stage_block(&mut staged, block, self.window_size).await? else {
            return Ok(Committed {
                applied: vec![],
                rolled_back: vec![],
                unconfirmed: vec![],
            });
        };

        let section = self.latest.begin_write();
        self.store.write(staged.into_batch()).await?;
        let removed = self.mempool.remove_many(&undo.txids);
        section.publish(LatestPointer::from(&block.header));

        debug!(
            height = block.header.height,
            hash = %block.header.hash,
            txs = undo.txids.len(),
            spent = undo.spent.len(),
            promoted = removed.len(),
            "block committed"
        );
        Ok(Committed {
            applied: vec![block.header.clone()],
            rolled_back: vec![],
            unconfirmed: vec![],
        })
    }

    /// Undo the block stored at `height` (which must be the stored tip) and
    /// return its non-coinbase transactions to the pending pool if the node
    /// still has them pending.
    ///
    /// The latest pointer is not moved, so until the caller applies a
    /// replacement block, queries stay tagged with the rolled back block
    /// while its rows are already gone. The sync loop never calls this;
    /// reorgs go through [`apply_plan`](Self::apply_plan), which publishes
    /// the new tip in the same section. Use it only for offline repair or
    /// when readers are quiesced.
    ///
    /// Rolling back an already rolled back height is a no-op.
    pub async fn rollback_block<N: NodeClient>(
        &self,
        node: &N,
        height: u64,
    ) -> Result<Committed, SyncError> {
        let mut staged = StagedWrites::new(self.store.as_ref());
        let Some(undo) = stage_rollback(&mut staged, height).await? else {
            return Ok(Committed {
                applied: vec![],
                rolled_back: vec![],
                unconfirmed: vec![],
            });
        };

        let section = self.latest.begin_write();
        self.store.write(staged.into_batch()).await?;
        section.finish();

        info!(height, hash = %undo.hash, txs = undo.txids.len(), "block rolled back");
        self.demote(node, &undo.demotable).await;
        Ok(Committed {
            applied: vec![],
            rolled_back: vec![height],
            unconfirmed: undo.demotable,
        })
    }

    /// Execute a reorg plan: every rollback (descending) then every apply
    /// (ascending), staged into one batch and committed atomically.
    ///
    /// `blocks` must be the full blocks for `plan.apply`, in the same order.
    pub async fn apply_plan<N: NodeClient>(
        &self,
        node: &N,
        plan: &ReorgPlan,
        blocks: &[Block],
    ) -> Result<Committed, SyncError> {
        if blocks.len() != plan.apply.len()
            || blocks
                .iter()
                .zip(&plan.apply)
                .any(|(b, h)| b.header.hash != h.hash)
        {
            return Err(SyncError::Aborted {
                reason: "reorg plan blocks do not match planned headers".into(),
            });
        }

        let mut staged = StagedWrites::new(self.store.as_ref());
        let mut unconfirmed = Vec::new();
        let mut rolled_back = Vec::with_capacity(plan.rollback.len());
        for height in &plan.rollback {
            if let Some(undo) = stage_rollback(&mut staged, *height).await? {
                unconfirmed.extend(undo.demotable);
                rolled_back.push(*height);
            }
        }

        let mut confirmed = HashSet::new();
        for block in blocks {
            if let Some(undo) = stage_block(&mut staged, block, self.window_size).await? {
                confirmed.extend(undo.txids);
            }
        }
        unconfirmed.retain(|txid| !confirmed.contains(txid));

        let new_tip = match plan.apply.last() {
            Some(tip) => LatestPointer::from(tip),
            None => LatestPointer::from(&plan.ancestor),
        };

        let section = self.latest.begin_write();
        self.store.write(staged.into_batch()).await?;
        self.mempool.remove_many(&confirmed);
        section.publish(new_tip);

        info!(
            ancestor = plan.ancestor.height,
            rolled_back = rolled_back.len(),
            applied = blocks.len(),
            unconfirmed = unconfirmed.len(),
            "reorg plan committed"
        );

        self.demote(node, &unconfirmed).await;
        Ok(Committed {
            applied: plan.apply.clone(),
            rolled_back,
            unconfirmed,
        })
    }

    /// Insert or refresh a pending transaction and its address links.
    ///
    /// Never touches unspent rows. Returns `false` if the txid is already
    /// confirmed in the index.
    pub async fn apply_pending(&self, tx: Transaction) -> Result<bool, SyncError> {
        if self
            .store
            .get(Table::TxHeights, &keys::txid_key(&tx.txid))
            .await?
            .is_some()
        {
            debug!(txid = %tx.txid, "pending transaction already confirmed, skipped");
            return Ok(false);
        }
        tx.validate().map_err(|reason| SyncError::Malformed {
            context: format!("pending transaction {}", tx.txid),
            reason,
        })?;

        let addresses = self.pending_addresses(&tx).await?;
        let entry = MempoolEntry::from(tx);

        let section = self.latest.begin_write();
        self.mempool.insert(entry, addresses);
        section.finish();
        Ok(true)
    }

    /// Drop a pending entry the node no longer reports.
    pub fn evict_pending(&self, txid: &str) -> bool {
        let section = self.latest.begin_write();
        let removed = self.mempool.remove(txid).is_some();
        section.finish();
        removed
    }

    /// Every address a pending transaction pays or spends from.
    async fn pending_addresses(&self, tx: &Transaction) -> Result<BTreeSet<String>, StoreError> {
        let mut addresses: BTreeSet<String> =
            tx.outputs.iter().filter_map(|o| o.address.clone()).collect();
        for input in tx.inputs.iter().filter(|i| !i.is_coinbase()) {
            let key = keys::outpoint_key(&input.prev_txid, input.prev_index);
            if let Some(raw) = self.store.get(Table::Outpoints, &key).await? {
                addresses.insert(String::from_utf8_lossy(&raw).into_owned());
            } else if let Some(output) = self.mempool.find_output(&input.prev_txid, input.prev_index)
            {
                addresses.extend(output.address);
            }
        }
        Ok(addresses)
    }

    /// Re-query the node for transactions that lost confirmation and put
    /// the ones it still holds back into the pending pool. Returns how many
    /// were re-inserted.
    ///
    /// Runs after the commit, so failures are logged rather than returned;
    /// the next mempool reconciliation picks up anything missed here.
    pub async fn demote<N: NodeClient>(&self, node: &N, txids: &[String]) -> usize {
        let mut reinserted = 0;
        for txid in txids {
            match self.demote_one(node, txid).await {
                Ok(true) => reinserted += 1,
                Ok(false) => debug!(%txid, "unconfirmed transaction dropped"),
                Err(e) => warn!(%txid, error = %e, "could not re-insert unconfirmed transaction"),
            }
        }
        reinserted
    }

    async fn demote_one<N: NodeClient>(&self, node: &N, txid: &str) -> Result<bool, SyncError> {
        let pending = match self
            .retry
            .run("is_still_pending", || node.is_still_pending(txid))
            .await
        {
            Ok(pending) => pending,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };
        if !pending {
            return Ok(false);
        }
        match self
            .retry
            .run("get_raw_transaction", || node.get_raw_transaction(txid))
            .await
        {
            Ok(mut tx) => {
                tx.height = None;
                self.apply_pending(tx).await
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ─── Staging ──────────────────────────────────────────────────────────────────

/// Stage the mutations for `block`. Returns `None` if the identical block is
/// already stored at its height.
///
/// Also drops the undo record that falls out of the last `window_size`
/// heights; no reorg the tracker accepts can reach it.
pub(crate) async fn stage_block(
    staged: &mut StagedWrites<'_>,
    block: &Block,
    window_size: usize,
) -> Result<Option<UndoRecord>, SyncError> {
    let header = &block.header;
    let height = header.height;
    let header_key = keys::height_key(height);

    if let Some(existing) = staged.get(Table::Headers, &header_key).await? {
        let existing = keys::decode_header(&existing)?;
        if existing.hash == header.hash {
            return Ok(None);
        }
        return Err(SyncError::Aborted {
            reason: format!(
                "height {height} already holds {}; roll it back before applying {}",
                existing.hash, header.hash
            ),
        });
    }
    if let Some(parent_height) = height.checked_sub(1) {
        if let Some(parent) = staged.get(Table::Headers, &keys::height_key(parent_height)).await? {
            let parent = keys::decode_header(&parent)?;
            if parent.hash != header.parent_hash {
                return Err(SyncError::Aborted {
                    reason: format!(
                        "block {} does not extend stored block {} at {parent_height}",
                        header.hash, parent.hash
                    ),
                });
            }
        }
    }

    let mut undo = UndoRecord {
        hash: header.hash.clone(),
        ..Default::default()
    };
    let mut history = BTreeSet::new();

    for tx in &block.transactions {
        undo.txids.push(tx.txid.clone());
        if !tx.is_coinbase() {
            undo.demotable.push(tx.txid.clone());
        }

        for input in tx.inputs.iter().filter(|i| !i.is_coinbase()) {
            let outpoint = keys::outpoint_key(&input.prev_txid, input.prev_index);
            let Some(raw_address) = staged.get(Table::Outpoints, &outpoint).await? else {
                // Output never paid an indexed address.
                continue;
            };
            let address = String::from_utf8_lossy(&raw_address).into_owned();
            let unspent = keys::unspent_key(&address, &input.prev_txid, input.prev_index);
            match staged.get(Table::Unspent, &unspent).await? {
                Some(raw) => {
                    let value: UnspentValue = keys::decode(Table::Unspent, &raw)?;
                    undo.spent.push(value.into_entry(
                        address.clone(),
                        input.prev_txid.clone(),
                        input.prev_index,
                    ));
                    staged.delete(Table::Unspent, unspent);
                    staged.delete(Table::Outpoints, outpoint);
                    history.insert((address, tx.txid.clone()));
                }
                None => {
                    warn!(
                        txid = %input.prev_txid,
                        vout = input.prev_index,
                        "outpoint without unspent row"
                    );
                }
            }
        }

        for output in &tx.outputs {
            let Some(address) = &output.address else {
                continue;
            };
            let entry = UnspentEntry {
                address: address.clone(),
                txid: tx.txid.clone(),
                output_index: output.index,
                value: output.value,
                script: output.script.clone(),
                height,
            };
            staged.put(
                Table::Unspent,
                keys::unspent_key(address, &tx.txid, output.index),
                keys::encode(Table::Unspent, &UnspentValue::from(&entry))?,
            );
            staged.put(
                Table::Outpoints,
                keys::outpoint_key(&tx.txid, output.index),
                address.as_bytes().to_vec(),
            );
            undo.created.push((address.clone(), tx.txid.clone(), output.index));
            history.insert((address.clone(), tx.txid.clone()));
        }

        staged.put(Table::TxHeights, keys::txid_key(&tx.txid), keys::height_key(height));
    }

    for (address, txid) in history {
        staged.put(Table::History, keys::history_key(&address, height, &txid), vec![]);
        undo.history.push((address, txid));
    }
    staged.put(Table::Headers, header_key, keys::encode(Table::Headers, header)?);
    staged.put(Table::Undo, keys::height_key(height), keys::encode(Table::Undo, &undo)?);
    if let Some(expired) = height.checked_sub(window_size as u64) {
        staged.delete(Table::Undo, keys::height_key(expired));
    }
    Ok(Some(undo))
}

/// Stage the inverse of the block stored at `height`. Returns `None` if
/// nothing is stored there.
pub(crate) async fn stage_rollback(
    staged: &mut StagedWrites<'_>,
    height: u64,
) -> Result<Option<UndoRecord>, SyncError> {
    let undo_key = keys::height_key(height);
    let Some(raw) = staged.get(Table::Undo, &undo_key).await? else {
        if staged.get(Table::Headers, &undo_key).await?.is_some() {
            return Err(SyncError::Aborted {
                reason: format!("undo record for {height} is older than the window"),
            });
        }
        return Ok(None);
    };
    if staged
        .get(Table::Headers, &keys::height_key(height + 1))
        .await?
        .is_some()
    {
        return Err(SyncError::Aborted {
            reason: format!("cannot roll back {height}: a block is stored above it"),
        });
    }
    let undo: UndoRecord = keys::decode(Table::Undo, &raw)?;

    for entry in &undo.spent {
        staged.put(
            Table::Unspent,
            keys::unspent_key(&entry.address, &entry.txid, entry.output_index),
            keys::encode(Table::Unspent, &UnspentValue::from(entry))?,
        );
        staged.put(
            Table::Outpoints,
            keys::outpoint_key(&entry.txid, entry.output_index),
            entry.address.as_bytes().to_vec(),
        );
    }
    // Outputs created and spent inside this block are restored above and
    // deleted here, leaving no trace.
    for (address, txid, vout) in &undo.created {
        staged.delete(Table::Unspent, keys::unspent_key(address, txid, *vout));
        staged.delete(Table::Outpoints, keys::outpoint_key(txid, *vout));
    }
    for (address, txid) in &undo.history {
        staged.delete(Table::History, keys::history_key(address, height, txid));
    }
    for txid in &undo.txids {
        staged.delete(Table::TxHeights, keys::txid_key(txid));
    }
    staged.delete(Table::Headers, keys::height_key(height));
    staged.delete(Table::Undo, undo_key);
    Ok(Some(undo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::node::NodeClient;
    use crate::testing::{coinbase, transfer, FaultyStore, MockNode};

    struct Fixture {
        node: MockNode,
        store: Arc<MemoryStore>,
        applier: Applier,
        latest: Arc<LatestCell>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let latest = Arc::new(LatestCell::default());
        let applier = Applier::new(
            store.clone(),
            Arc::new(MempoolStore::new()),
            latest.clone(),
            RetryPolicy::default(),
            100,
        );
        Fixture {
            node: MockNode::new(),
            store,
            applier,
            latest,
        }
    }

    impl Fixture {
        async fn mine(&self, txs: Vec<Transaction>) -> Block {
            let header = self.node.mine(txs);
            let block = self.node.get_block(&header.hash).await.unwrap();
            self.applier.apply_block(&block).await.unwrap();
            block
        }
    }

    #[tokio::test]
    async fn apply_then_rollback_restores_exact_state() {
        let f = fixture();
        f.mine(vec![coinbase("c0", "A", 50)]).await;
        f.mine(vec![coinbase("c1", "A", 25)]).await;
        let before = f.store.snapshot();

        let block = f
            .mine(vec![
                coinbase("c2", "M", 50),
                transfer("t1", &[("c0", 0)], &[("B", 30), ("A", 20)]),
                transfer("t2", &[("t1", 0)], &[("C", 30)]),
            ])
            .await;
        assert_eq!(f.latest.latest().height, 2);
        assert_eq!(f.store.count(Table::Unspent), 4);
        let applied = f.store.snapshot();

        let committed = f.applier.rollback_block(&f.node, 2).await.unwrap();
        assert_eq!(committed.rolled_back, vec![2]);
        assert_eq!(f.store.snapshot(), before);

        // Rolling back the same height again is a no-op.
        let again = f.applier.rollback_block(&f.node, 2).await.unwrap();
        assert!(again.rolled_back.is_empty());
        assert_eq!(f.store.snapshot(), before);

        // Reapplying the identical block reproduces identical bytes.
        f.applier.apply_block(&block).await.unwrap();
        assert_eq!(f.store.snapshot(), applied);
    }

    #[tokio::test]
    async fn reapplying_stored_block_is_noop() {
        let f = fixture();
        let block = f.mine(vec![coinbase("c0", "A", 50)]).await;
        let before = f.store.snapshot();
        let committed = f.applier.apply_block(&block).await.unwrap();
        assert!(committed.applied.is_empty());
        assert_eq!(f.store.snapshot(), before);
    }

    #[tokio::test]
    async fn block_not_extending_stored_tip_is_rejected() {
        let f = fixture();
        f.mine(vec![coinbase("c0", "A", 50)]).await;
        let mut stray = f.node.get_block(&f.node.mine(vec![]).hash).await.unwrap();
        stray.header.parent_hash = "elsewhere".into();
        let err = f.applier.apply_block(&stray).await.unwrap_err();
        assert!(matches!(err, SyncError::Aborted { .. }));
        assert_eq!(f.latest.latest().height, 0);
    }

    #[tokio::test]
    async fn spends_of_unindexed_outputs_are_skipped() {
        let f = fixture();
        f.mine(vec![transfer("t0", &[("unknown", 3)], &[("A", 1)])]).await;
        assert_eq!(f.store.count(Table::Unspent), 1);
        assert_eq!(f.store.count(Table::History), 1);
    }

    #[tokio::test]
    async fn confirmation_removes_pending_entry() {
        let f = fixture();
        f.mine(vec![coinbase("c0", "A", 50)]).await;
        let pending = transfer("t1", &[("c0", 0)], &[("B", 50)]);
        assert!(f.applier.apply_pending(pending.clone()).await.unwrap());
        assert!(f.applier.mempool().contains("t1"));

        f.mine(vec![pending.clone()]).await;
        assert!(!f.applier.mempool().contains("t1"));
        // Already confirmed: refused.
        assert!(!f.applier.apply_pending(pending).await.unwrap());
    }

    #[tokio::test]
    async fn rollback_demotes_only_still_pending() {
        let f = fixture();
        f.mine(vec![coinbase("c0", "A", 50)]).await;
        f.mine(vec![
            coinbase("c1", "M", 50),
            transfer("keep", &[("c0", 0)], &[("B", 10)]),
            transfer("gone", &[("unknown", 0)], &[("B", 10)]),
        ])
        .await;
        f.node.add_pending(transfer("keep", &[("c0", 0)], &[("B", 10)]));

        let committed = f.applier.rollback_block(&f.node, 1).await.unwrap();
        assert_eq!(committed.unconfirmed, vec!["keep", "gone"]);
        assert_eq!(f.applier.mempool().txids(), vec!["keep"]);
        assert_eq!(f.latest.latest().height, 1, "bare rollback does not move the pointer");
    }

    #[tokio::test]
    async fn mismatched_plan_commits_nothing() {
        let f = fixture();
        f.mine(vec![coinbase("c0", "A", 50)]).await;
        let tip = f.mine(vec![coinbase("c1", "A", 50)]).await;
        let before = f.store.snapshot();

        let plan = ReorgPlan {
            ancestor: tip.header.clone(),
            rollback: vec![],
            apply: vec![tip.header.clone()],
        };
        let err = f.applier.apply_plan(&f.node, &plan, &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Aborted { .. }));
        assert_eq!(f.store.snapshot(), before);
    }

    #[tokio::test]
    async fn failed_write_keeps_pending_entry() {
        let node = MockNode::new();
        let store = Arc::new(FaultyStore::new());
        let latest = Arc::new(LatestCell::default());
        let applier = Applier::new(
            store.clone(),
            Arc::new(MempoolStore::new()),
            latest.clone(),
            RetryPolicy::default(),
            100,
        );
        let genesis = node.mine(vec![coinbase("c0", "A", 50)]);
        applier
            .apply_block(&node.get_block(&genesis.hash).await.unwrap())
            .await
            .unwrap();
        let pending = transfer("t1", &[("c0", 0)], &[("B", 50)]);
        assert!(applier.apply_pending(pending.clone()).await.unwrap());

        let header = node.mine(vec![pending]);
        let block = node.get_block(&header.hash).await.unwrap();
        store.fail_writes(true);
        let err = applier.apply_block(&block).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
        assert!(applier.mempool().contains("t1"), "pending entry survives the failed commit");
        assert!(!latest.load().is_writing());
        assert_eq!(latest.latest().height, 0);

        let tip = node.get_block(&genesis.hash).await.unwrap().header;
        let plan = ReorgPlan {
            ancestor: tip,
            rollback: vec![],
            apply: vec![block.header.clone()],
        };
        assert!(applier.apply_plan(&node, &plan, &[block.clone()]).await.is_err());
        assert!(applier.mempool().contains("t1"));

        store.fail_writes(false);
        applier.apply_block(&block).await.unwrap();
        assert!(!applier.mempool().contains("t1"));
        assert_eq!(latest.latest().height, 1);
    }

    #[tokio::test]
    async fn undo_records_cover_the_window_only() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let applier = Applier::new(
            store.clone(),
            Arc::new(MempoolStore::new()),
            Arc::new(LatestCell::default()),
            RetryPolicy::default(),
            3,
        );
        for i in 0..8 {
            let header = node.mine(vec![coinbase(&format!("c{i}"), "A", 1)]);
            let block = node.get_block(&header.hash).await.unwrap();
            applier.apply_block(&block).await.unwrap();
            assert!(store.count(Table::Undo) <= 3);
        }
        let heights: Vec<u64> = store
            .range(Table::Undo, &[], None)
            .await
            .unwrap()
            .iter()
            .map(|(k, _)| u64::from_be_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(heights, vec![5, 6, 7]);

        // The tip is still within the window.
        let committed = applier.rollback_block(&node, 7).await.unwrap();
        assert_eq!(committed.rolled_back, vec![7]);
        assert_eq!(store.count(Table::Undo), 2);
    }

    #[tokio::test]
    async fn rollback_past_the_window_is_refused() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let applier = Applier::new(
            store.clone(),
            Arc::new(MempoolStore::new()),
            Arc::new(LatestCell::default()),
            RetryPolicy::default(),
            1,
        );
        for i in 0..3 {
            let header = node.mine(vec![coinbase(&format!("c{i}"), "A", 1)]);
            applier
                .apply_block(&node.get_block(&header.hash).await.unwrap())
                .await
                .unwrap();
        }
        applier.rollback_block(&node, 2).await.unwrap();
        let before = store.snapshot();
        let err = applier.rollback_block(&node, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::Aborted { .. }));
        assert_eq!(store.snapshot(), before);
    }
}
