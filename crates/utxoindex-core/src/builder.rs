//! Fluent builder for sync loops.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use utxoindex_core::{IndexerBuilder, MemoryStore, NodeClient, QueryEngine};
//!
//! fn wire<N: NodeClient>(node: N) -> QueryEngine {
//!     let sync = IndexerBuilder::new()
//!         .window_size(200)
//!         .start_height(800_000)
//!         .poll_interval_ms(500)
//!         .build(node, Arc::new(MemoryStore::new()));
//!     sync.query_engine()
//! }
//! ```

use std::sync::Arc;

use crate::indexer::IndexerConfig;
use crate::node::NodeClient;
use crate::retry::RetryConfig;
use crate::store::KvStore;
use crate::sync::SyncLoop;

/// Fluent builder for [`IndexerConfig`] and [`SyncLoop`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. one loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Number of recent headers kept for reorg resolution.
    pub fn window_size(mut self, n: usize) -> Self {
        self.config.window_size = n;
        self
    }

    /// First block indexed on an empty store.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Re-check the first `n` stored unspent rows against the node at start-up.
    pub fn audit_unspent_on_start(mut self, n: usize) -> Self {
        self.config.audit_unspent_on_start = n;
        self
    }

    pub fn mempool_fetch_concurrency(mut self, n: usize) -> Self {
        self.config.mempool_fetch_concurrency = n;
        self
    }

    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Wire a sync loop over `node` and `store`.
    pub fn build<N: NodeClient>(self, node: N, store: Arc<dyn KvStore>) -> SyncLoop<N> {
        SyncLoop::new(self.config, node, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::testing::MockNode;

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.window_size, 100);
        assert_eq!(cfg.start_height, 0);
        assert_eq!(cfg.audit_unspent_on_start, 0);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .window_size(12)
            .start_height(500)
            .poll_interval_ms(250)
            .audit_unspent_on_start(20)
            .build_config();
        assert_eq!(cfg.window_size, 12);
        assert_eq!(cfg.start_height, 500);
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.audit_unspent_on_start, 20);
    }

    #[test]
    fn build_wires_an_idle_loop() {
        let sync = IndexerBuilder::new()
            .window_size(3)
            .build(MockNode::new(), Arc::new(MemoryStore::new()));
        assert_eq!(sync.state(), crate::indexer::IndexerState::Idle);
        assert_eq!(sync.tracker().window_size(), 3);
        assert_eq!(sync.latest(), crate::types::LatestPointer::default());
    }
}
