//! The node surface the engine consumes.
//!
//! Implementations validate everything at this boundary: a `Block` or
//! `Transaction` handed to the engine is already structurally sound, or the
//! call failed with [`NodeError::Malformed`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::NodeError;
use crate::types::{Block, BlockHeader, ChainTip, Transaction};

/// Typed request/response access to a full node. Stateless.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Best block hash and height.
    async fn get_tip(&self) -> Result<ChainTip, NodeError>;

    /// Hash of the active-chain block at `height`.
    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError>;

    /// Header only, without transactions.
    async fn get_block_header(&self, hash: &str) -> Result<BlockHeader, NodeError>;

    /// Header plus transactions in block order.
    async fn get_block(&self, hash: &str) -> Result<Block, NodeError>;

    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, NodeError>;

    /// Txids currently in the node's pending pool.
    async fn list_pending(&self) -> Result<Vec<String>, NodeError>;

    async fn is_still_pending(&self, txid: &str) -> Result<bool, NodeError>;

    /// `true` if output `(txid, vout)` exists and is unspent in the node's best chain.
    async fn is_output_unspent(&self, txid: &str, vout: u32) -> Result<bool, NodeError>;
}

#[async_trait]
impl<N: NodeClient + ?Sized> NodeClient for Arc<N> {
    async fn get_tip(&self) -> Result<ChainTip, NodeError> {
        (**self).get_tip().await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        (**self).get_block_hash(height).await
    }

    async fn get_block_header(&self, hash: &str) -> Result<BlockHeader, NodeError> {
        (**self).get_block_header(hash).await
    }

    async fn get_block(&self, hash: &str) -> Result<Block, NodeError> {
        (**self).get_block(hash).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, NodeError> {
        (**self).get_raw_transaction(txid).await
    }

    async fn list_pending(&self) -> Result<Vec<String>, NodeError> {
        (**self).list_pending().await
    }

    async fn is_still_pending(&self, txid: &str) -> Result<bool, NodeError> {
        (**self).is_still_pending(txid).await
    }

    async fn is_output_unspent(&self, txid: &str, vout: u32) -> Result<bool, NodeError> {
        (**self).is_output_unspent(txid, vout).await
    }
}
