//! Reorg resolution.
//!
//! Given a header that does not extend the tracked tip, walk the node's
//! branch backward one header per RPC while comparing against the tracked
//! window at equal heights. The first height where both agree is the common
//! ancestor. The result is a two-phase plan: roll back the tracked blocks
//! above the ancestor (descending), then apply the new branch (ascending).

use tracing::warn;

use crate::error::SyncError;
use crate::node::NodeClient;
use crate::retry::RetryPolicy;
use crate::tracker::ChainTracker;
use crate::types::BlockHeader;

/// An ordered rollback + reapply plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgPlan {
    /// Highest block present on both branches.
    pub ancestor: BlockHeader,
    /// Tracked heights to undo, from the old tip down to `ancestor + 1`.
    pub rollback: Vec<u64>,
    /// New-branch headers from `ancestor + 1` up to the new tip.
    pub apply: Vec<BlockHeader>,
}

impl ReorgPlan {
    /// Number of blocks rolled back.
    pub fn depth(&self) -> usize {
        self.rollback.len()
    }

    /// Height the index will sit at once the plan is committed.
    pub fn target_height(&self) -> u64 {
        self.apply
            .last()
            .map(|h| h.height)
            .unwrap_or(self.ancestor.height)
    }
}

/// Finds common ancestors and builds [`ReorgPlan`]s.
#[derive(Debug, Clone, Default)]
pub struct ReorgResolver {
    retry: RetryPolicy,
}

impl ReorgResolver {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Build a plan that moves the index from the tracked tip to `new_tip`.
    ///
    /// Fails with [`SyncError::ReorgTooDeep`] when the walk leaves the
    /// tracked window without finding a shared block.
    pub async fn resolve<N: NodeClient>(
        &self,
        node: &N,
        tracker: &ChainTracker,
        new_tip: BlockHeader,
    ) -> Result<ReorgPlan, SyncError> {
        let (Some(tip), Some(oldest)) = (tracker.tip(), tracker.oldest()) else {
            return Err(SyncError::Aborted {
                reason: "cannot resolve a reorg with an empty chain tracker".into(),
            });
        };
        let too_deep = |header: &BlockHeader| SyncError::ReorgTooDeep {
            new_tip_height: header.height,
            new_tip_hash: header.hash.clone(),
            window: tracker.len(),
        };

        let mut branch = Vec::new();
        let mut cursor = new_tip.clone();
        let ancestor = loop {
            if let Some(ours) = tracker.header_at(cursor.height) {
                if ours.hash == cursor.hash {
                    break ours.clone();
                }
            } else if cursor.height < oldest.height {
                return Err(too_deep(&new_tip));
            }
            if cursor.height == 0 || cursor.height <= oldest.height {
                // The oldest tracked block itself differs: nothing left to compare.
                return Err(too_deep(&new_tip));
            }

            let parent_hash = cursor.parent_hash.clone();
            let parent = self
                .retry
                .run("get_block_header", || node.get_block_header(&parent_hash))
                .await?;
            if parent.hash != parent_hash || parent.height + 1 != cursor.height {
                return Err(SyncError::Malformed {
                    context: format!("header {parent_hash}"),
                    reason: format!(
                        "expected parent of {} at height {}, got {} at {}",
                        cursor.hash,
                        cursor.height - 1,
                        parent.hash,
                        parent.height
                    ),
                });
            }
            branch.push(cursor);
            cursor = parent;
        };

        branch.reverse();
        let rollback: Vec<u64> = (ancestor.height + 1..=tip.height).rev().collect();

        if !rollback.is_empty() {
            warn!(
                depth = rollback.len(),
                ancestor = ancestor.height,
                old_tip = %tip.hash,
                new_tip = %new_tip.hash,
                new_height = new_tip.height,
                "reorg detected"
            );
        }

        Ok(ReorgPlan {
            ancestor,
            rollback,
            apply: branch,
        })
    }
}
