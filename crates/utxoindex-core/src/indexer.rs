//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Configuration for a sync loop instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Number of recent headers kept for reorg resolution. A fork below
    /// this window halts the sync loop.
    pub window_size: usize,
    /// First block indexed when the store is empty.
    pub start_height: u64,
    /// Tip polling interval in live mode (milliseconds).
    pub poll_interval_ms: u64,
    /// Backoff for node calls.
    pub retry: RetryConfig,
    /// Number of stored unspent rows re-checked against the node at start-up.
    /// `0` disables the audit.
    pub audit_unspent_on_start: usize,
    /// Concurrent `getrawtransaction` calls during mempool reconciliation.
    pub mempool_fetch_concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            start_height: 0,
            poll_interval_ms: 1000,
            retry: RetryConfig::default(),
            audit_unspent_on_start: 0,
            mempool_fetch_concurrency: 8,
        }
    }
}

/// Runtime state of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Catching up to the node tip.
    Syncing,
    /// At the node tip, following new blocks.
    Live,
    /// Executing a reorg plan.
    ReorgRecovery,
    /// Halted by a fatal error; reads keep being served from the last good state.
    Stalled,
    /// Terminated by shutdown.
    Stopped,
}

impl IndexerState {
    /// `true` once the loop will not write again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stalled | Self::Stopped)
    }
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Live => write!(f, "live"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stalled => write!(f, "stalled"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
