//! utxoindex-core — reorg-safe address, transaction and unspent-output
//! indexing for UTXO chains.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → SyncLoop (single writer)
//!                      ├── NodeClient      (typed node RPC, retried with backoff)
//!                      ├── ChainTracker    (last N headers, parent hash chain)
//!                      ├── ReorgResolver   (common ancestor → rollback/apply plan)
//!                      ├── Applier         (atomic block batches, undo records)
//!                      ├── MempoolStore    (pending txs + address index)
//!                      └── KvStore backend (memory / SQLite)
//!
//! QueryEngine (many readers) ── LatestCell snapshot ── KvStore + MempoolStore
//! ```

pub mod applier;
pub mod builder;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod memory;
pub mod mempool;
pub mod node;
pub mod pointer;
pub mod query;
pub mod reorg;
pub mod retry;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;
pub mod types;

pub use applier::{Applier, Committed};
pub use builder::IndexerBuilder;
pub use error::{NodeError, QueryError, StoreError, SyncError};
pub use indexer::{IndexerConfig, IndexerState};
pub use memory::MemoryStore;
pub use mempool::MempoolStore;
pub use node::NodeClient;
pub use pointer::{LatestCell, Snapshot};
pub use query::{AddressQuery, QueryEngine, QueryResponse, QuerySource, QueryStatus, TxRow, UnspentRow};
pub use reorg::{ReorgPlan, ReorgResolver};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{BatchOp, KvStore, Table, WriteBatch};
pub use sync::{SyncLoop, SyncReport};
pub use tracker::ChainTracker;
pub use types::{
    AddressHistoryEntry, Block, BlockHeader, ChainTip, LatestPointer, MempoolEntry, Transaction,
    TxInput, TxOutput, UnspentEntry,
};
