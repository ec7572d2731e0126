//! The sync loop — the single writer.
//!
//! One sequential stream per cycle:
//!   1. Poll the node tip.
//!   2. Catch up block by block, checking each block's parent against the
//!      tracked tip. A mismatch becomes a reorg plan that is fetched in full,
//!      then committed as one batch.
//!   3. Reconcile the pending pool: fetch new pending transactions, evict the
//!      ones the node no longer holds.
//!
//! Transient node errors are retried with backoff inside a step; a cycle that
//! still fails is logged and retried after the poll interval. Fatal errors
//! (reorg deeper than the tracked window, malformed node data, corrupt store)
//! stop the loop and leave the indices at the last good state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::applier::Applier;
use crate::error::SyncError;
use crate::indexer::{IndexerConfig, IndexerState};
use crate::keys;
use crate::mempool::MempoolStore;
use crate::node::NodeClient;
use crate::pointer::LatestCell;
use crate::query::QueryEngine;
use crate::reorg::ReorgResolver;
use crate::retry::RetryPolicy;
use crate::store::{KvStore, Table};
use crate::tracker::ChainTracker;
use crate::types::{Block, BlockHeader, LatestPointer, Transaction};

/// How many times one cycle re-derives its step after a vanished hash or txid.
const MAX_STEP_RESTARTS: u32 = 3;

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub rolled_back: usize,
    pub reorgs: usize,
    pub pending_added: usize,
    pub pending_evicted: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

enum Step {
    Advanced,
    UpToDate,
}

/// Drives the node → index pipeline.
pub struct SyncLoop<N: NodeClient> {
    config: IndexerConfig,
    node: N,
    retry: RetryPolicy,
    resolver: ReorgResolver,
    tracker: ChainTracker,
    applier: Applier,
    latest: Arc<LatestCell>,
    state: watch::Sender<IndexerState>,
    shutdown: Option<watch::Receiver<bool>>,
    bootstrapped: bool,
}

impl<N: NodeClient> SyncLoop<N> {
    pub fn new(config: IndexerConfig, node: N, store: Arc<dyn KvStore>) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        let latest = Arc::new(LatestCell::default());
        let applier = Applier::new(
            store,
            Arc::new(MempoolStore::new()),
            latest.clone(),
            retry.clone(),
            config.window_size,
        );
        let (state, _) = watch::channel(IndexerState::Idle);
        Self {
            tracker: ChainTracker::new(config.window_size),
            resolver: ReorgResolver::new(retry.clone()),
            retry,
            node,
            applier,
            latest,
            state,
            shutdown: None,
            bootstrapped: false,
            config,
        }
    }

    /// A query engine reading the same stores this loop writes.
    pub fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(
            self.applier.store().clone(),
            self.applier.mempool().clone(),
            self.latest.clone(),
        )
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<IndexerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> IndexerState {
        *self.state.borrow()
    }

    pub fn tracker(&self) -> &ChainTracker {
        &self.tracker
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }

    pub fn latest(&self) -> LatestPointer {
        self.latest.latest()
    }

    /// Rebuild the tracker and the latest pointer from the stored headers.
    pub async fn bootstrap(&mut self) -> Result<(), SyncError> {
        let rows = self
            .applier
            .store()
            .last(Table::Headers, self.config.window_size)
            .await?;
        let headers = rows
            .iter()
            .map(|(_, value)| keys::decode_header(value))
            .collect::<Result<Vec<_>, _>>()?;
        self.tracker = ChainTracker::restore(self.config.window_size, headers);

        match self.tracker.tip() {
            Some(tip) => {
                self.latest.reset(LatestPointer::from(tip));
                info!(
                    height = tip.height,
                    hash = %tip.hash,
                    tracked = self.tracker.len(),
                    "resuming from stored tip"
                );
            }
            None => info!(start = self.config.start_height, "empty index, starting fresh"),
        }

        if self.config.audit_unspent_on_start > 0 {
            self.audit_unspent().await?;
        }
        self.bootstrapped = true;
        Ok(())
    }

    /// Run until `shutdown` flips to `true` or a fatal error occurs.
    ///
    /// Shutdown is observed only between steps, so an in-flight batch always
    /// completes. A fatal error leaves the state at [`IndexerState::Stalled`]
    /// and is returned; the stores keep serving reads.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        self.shutdown = Some(shutdown.clone());
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once().await {
                Ok(report) if !report.is_empty() => debug!(?report, "sync cycle complete"),
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, latest = self.latest.latest().height, "sync loop halted");
                    self.set_state(IndexerState::Stalled);
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "sync cycle failed, retrying next cycle"),
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_state(IndexerState::Stopped);
        info!(latest = self.latest.latest().height, "sync loop stopped");
        Ok(())
    }

    /// One full cycle: blocks, then the pending pool.
    pub async fn poll_once(&mut self) -> Result<SyncReport, SyncError> {
        if !self.bootstrapped {
            self.bootstrap().await?;
        }
        let mut report = SyncReport::default();
        self.sync_blocks(&mut report).await?;
        if !self.stopping() {
            self.reconcile_mempool(&mut report).await?;
        }
        Ok(report)
    }

    // ─── Blocks ───────────────────────────────────────────────────────────────

    async fn sync_blocks(&mut self, report: &mut SyncReport) -> Result<(), SyncError> {
        let mut restarts = 0;
        while !self.stopping() {
            match self.step(report).await {
                Ok(Step::Advanced) => {}
                Ok(Step::UpToDate) => {
                    self.set_state(IndexerState::Live);
                    break;
                }
                Err(e) if e.is_not_found() && restarts < MAX_STEP_RESTARTS => {
                    restarts += 1;
                    debug!(error = %e, restarts, "node state moved underneath, re-deriving step");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn step(&mut self, report: &mut SyncReport) -> Result<Step, SyncError> {
        let node_tip = self.retry.run("get_tip", || self.node.get_tip()).await?;

        let Some(tip) = self.tracker.tip().cloned() else {
            let start = self.config.start_height;
            if node_tip.height < start {
                debug!(node = node_tip.height, start, "node below start height, waiting");
                return Ok(Step::UpToDate);
            }
            self.set_state(IndexerState::Syncing);
            let block = self.fetch_block_at(start).await?;
            self.apply_next(&block, report).await?;
            return Ok(Step::Advanced);
        };

        if node_tip.hash == tip.hash {
            return Ok(Step::UpToDate);
        }
        if node_tip.height < tip.height {
            // Resolving now would publish a lower pointer; wait for the node
            // to overtake the indexed tip.
            warn!(
                node = node_tip.height,
                indexed = tip.height,
                "node tip below indexed tip, deferring"
            );
            return Ok(Step::UpToDate);
        }
        if node_tip.height == tip.height {
            let header = self
                .retry
                .run("get_block_header", || self.node.get_block_header(&node_tip.hash))
                .await?;
            self.reorg(header, report).await?;
            return Ok(Step::Advanced);
        }

        if node_tip.height > tip.height + 1 {
            self.set_state(IndexerState::Syncing);
        }
        let block = self.fetch_block_at(tip.height + 1).await?;
        if block.header.parent_hash == tip.hash {
            self.apply_next(&block, report).await?;
        } else {
            self.reorg(block.header, report).await?;
        }
        Ok(Step::Advanced)
    }

    async fn apply_next(&mut self, block: &Block, report: &mut SyncReport) -> Result<(), SyncError> {
        let committed = self.applier.apply_block(block).await?;
        self.tracker
            .accept(block.header.clone())
            .map_err(|fork| SyncError::Aborted {
                reason: format!(
                    "committed block {} does not extend tracked tip {}",
                    fork.header.hash, fork.tip_height
                ),
            })?;
        report.applied += committed.applied.len();
        if block.header.height % 1000 == 0 {
            info!(height = block.header.height, hash = %block.header.hash, "indexed");
        }
        Ok(())
    }

    async fn reorg(&mut self, new_tip: BlockHeader, report: &mut SyncReport) -> Result<(), SyncError> {
        let previous = self.state();
        self.set_state(IndexerState::ReorgRecovery);

        let plan = self.resolver.resolve(&self.node, &self.tracker, new_tip).await?;
        let mut blocks = Vec::with_capacity(plan.apply.len());
        for header in &plan.apply {
            blocks.push(self.fetch_block(&header.hash).await?);
        }
        let committed = self.applier.apply_plan(&self.node, &plan, &blocks).await?;

        self.tracker.rewind_to(plan.ancestor.height);
        for header in &plan.apply {
            self.tracker
                .accept(header.clone())
                .map_err(|fork| SyncError::Aborted {
                    reason: format!(
                        "planned header {} does not extend tracked tip {}",
                        fork.header.hash, fork.tip_height
                    ),
                })?;
        }

        report.reorgs += 1;
        report.rolled_back += committed.rolled_back.len();
        report.applied += committed.applied.len();
        info!(
            ancestor = plan.ancestor.height,
            depth = plan.depth(),
            new_height = plan.target_height(),
            unconfirmed = committed.unconfirmed.len(),
            "reorg resolved"
        );
        self.set_state(previous);
        Ok(())
    }

    async fn fetch_block_at(&self, height: u64) -> Result<Block, SyncError> {
        let hash = self
            .retry
            .run("get_block_hash", || self.node.get_block_hash(height))
            .await?;
        self.fetch_block(&hash).await
    }

    async fn fetch_block(&self, hash: &str) -> Result<Block, SyncError> {
        let block = self
            .retry
            .run("get_block", || self.node.get_block(hash))
            .await?;
        block.validate(hash).map_err(|reason| SyncError::Malformed {
            context: format!("block {hash}"),
            reason,
        })?;
        Ok(block)
    }

    // ─── Pending pool ─────────────────────────────────────────────────────────

    async fn reconcile_mempool(&mut self, report: &mut SyncReport) -> Result<(), SyncError> {
        let listed = self
            .retry
            .run("list_pending", || self.node.list_pending())
            .await?;
        let listed_set: HashSet<&str> = listed.iter().map(String::as_str).collect();
        let mempool = self.applier.mempool().clone();

        for txid in mempool.txids() {
            if listed_set.contains(txid.as_str()) {
                continue;
            }
            let still_pending = match self
                .retry
                .run("is_still_pending", || self.node.is_still_pending(&txid))
                .await
            {
                Ok(pending) => pending,
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e.into()),
            };
            if !still_pending && self.applier.evict_pending(&txid) {
                debug!(%txid, "evicted pending transaction");
                report.pending_evicted += 1;
            }
        }

        let missing: Vec<String> = listed
            .iter()
            .filter(|txid| !mempool.contains(txid))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let node = &self.node;
        let retry = &self.retry;
        let fetched: Vec<(String, Result<Transaction, _>)> = stream::iter(missing)
            .map(|txid| async move {
                let result = retry
                    .run("get_raw_transaction", || node.get_raw_transaction(&txid))
                    .await;
                (txid, result)
            })
            .buffer_unordered(self.config.mempool_fetch_concurrency.max(1))
            .collect()
            .await;

        let mut txs = Vec::with_capacity(fetched.len());
        for (txid, result) in fetched {
            match result {
                Ok(tx) if tx.height.is_none() => txs.push(tx),
                Ok(_) => debug!(%txid, "transaction confirmed before it was fetched"),
                Err(e) if e.is_not_found() => debug!(%txid, "pending transaction vanished"),
                Err(e) => return Err(e.into()),
            }
        }

        for tx in parents_first(txs) {
            let txid = tx.txid.clone();
            if self.applier.apply_pending(tx).await? {
                debug!(%txid, "pending transaction added");
                report.pending_added += 1;
            }
        }
        Ok(())
    }

    // ─── Start-up audit ───────────────────────────────────────────────────────

    /// Check the first `audit_unspent_on_start` unspent rows against the node.
    /// Returns how many rows were checked.
    async fn audit_unspent(&self) -> Result<usize, SyncError> {
        let limit = self.config.audit_unspent_on_start;
        let rows = self.applier.store().first(Table::Unspent, &[], limit).await?;
        let mut checked = 0usize;
        let mut mismatches = 0usize;
        for (key, _) in &rows {
            let (address, txid, vout) = keys::decode_unspent_key(key)?;
            match self
                .retry
                .run("is_output_unspent", || self.node.is_output_unspent(&txid, vout))
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    mismatches += 1;
                    warn!(%address, %txid, vout, "indexed unspent output is spent or unknown on node");
                }
                Err(e) => {
                    warn!(error = %e, checked, "unspent audit interrupted");
                    break;
                }
            }
            checked += 1;
        }
        info!(checked, mismatches, "unspent audit finished");
        Ok(checked)
    }

    fn set_state(&self, next: IndexerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "indexer state");
            *current = next;
            true
        });
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Order pending transactions so that one spending another's output comes
/// after it; otherwise by txid.
fn parents_first(mut txs: Vec<Transaction>) -> Vec<Transaction> {
    txs.sort_by(|a, b| a.txid.cmp(&b.txid));
    let mut ordered = Vec::with_capacity(txs.len());
    while !txs.is_empty() {
        let waiting: HashSet<String> = txs.iter().map(|tx| tx.txid.clone()).collect();
        let (ready, blocked): (Vec<_>, Vec<_>) = txs.into_iter().partition(|tx| {
            tx.inputs
                .iter()
                .all(|i| i.prev_txid == tx.txid || !waiting.contains(&i.prev_txid))
        });
        if ready.is_empty() {
            // Cycle in node data; keep txid order.
            ordered.extend(blocked);
            break;
        }
        ordered.extend(ready);
        txs = blocked;
    }
    ordered
}
