//! Shared data model for the indexing pipeline.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Txid used by coinbase inputs.
pub const NULL_TXID: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Output index used by coinbase inputs.
pub const NULL_INDEX: u32 = u32::MAX;

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// An accepted block header. Superseded, never mutated, on rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub height: u64,
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.height == parent.height + 1 && self.parent_hash == parent.hash
    }
}

/// The node's current best block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub hash: String,
    pub height: u64,
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// Reference to a previous output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_txid: String,
    pub prev_index: u32,
}

impl TxInput {
    pub fn new(prev_txid: impl Into<String>, prev_index: u32) -> Self {
        Self {
            prev_txid: prev_txid.into(),
            prev_index,
        }
    }

    /// A coinbase input has no source output.
    pub fn coinbase() -> Self {
        Self::new(NULL_TXID, NULL_INDEX)
    }

    /// Coinbase inputs are never resolved against the unspent set.
    pub fn is_coinbase(&self) -> bool {
        self.prev_index == NULL_INDEX && self.prev_txid.bytes().all(|b| b == b'0')
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub index: u32,
    /// Derived address; `None` for scripts that do not pay an address (e.g. OP_RETURN).
    pub address: Option<String>,
    /// Value in the smallest unit (satoshis).
    pub value: u64,
    /// Hex-encoded output script.
    pub script: String,
}

/// A transaction as reported by the node. `height == None` means pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub height: Option<u64>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Returns `true` if every input is a coinbase input.
    pub fn is_coinbase(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(TxInput::is_coinbase)
    }

    /// Structural checks applied to everything the node hands us.
    pub fn validate(&self) -> Result<(), String> {
        if self.txid.is_empty() || self.txid.contains('\0') {
            return Err(format!("invalid txid {:?}", self.txid));
        }
        if self.inputs.is_empty() {
            return Err(format!("transaction {} has no inputs", self.txid));
        }
        let mut seen = HashSet::with_capacity(self.outputs.len());
        for output in &self.outputs {
            if !seen.insert(output.index) {
                return Err(format!(
                    "transaction {} has duplicate output index {}",
                    self.txid, output.index
                ));
            }
            if let Some(address) = &output.address {
                // Index keys use NUL as the address terminator.
                if address.is_empty() || address.contains('\0') {
                    return Err(format!(
                        "transaction {} output {} has invalid address {address:?}",
                        self.txid, output.index
                    ));
                }
            }
        }
        for input in &self.inputs {
            if input.prev_txid.is_empty() || input.prev_txid.contains('\0') {
                return Err(format!("transaction {} has an input without prevTxid", self.txid));
            }
        }
        Ok(())
    }
}

/// A full block: header plus transactions in block order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Checks that the block is self-consistent and is the block we asked for.
    pub fn validate(&self, expected_hash: &str) -> Result<(), String> {
        if self.header.hash != expected_hash {
            return Err(format!(
                "requested block {expected_hash}, node returned {}",
                self.header.hash
            ));
        }
        let mut txids = HashSet::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            tx.validate()?;
            if tx.height != Some(self.header.height) {
                return Err(format!(
                    "transaction {} carries height {:?} inside block at {}",
                    tx.txid, tx.height, self.header.height
                ));
            }
            if !txids.insert(tx.txid.as_str()) {
                return Err(format!("duplicate transaction {} in block", tx.txid));
            }
        }
        Ok(())
    }
}

// ─── Index rows ───────────────────────────────────────────────────────────────

/// An output that has not been consumed by any confirmed input at or below the tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentEntry {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub value: u64,
    pub script: String,
    pub height: u64,
}

/// One (address, txid) participation, confirmed or pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressHistoryEntry {
    pub address: String,
    pub txid: String,
    pub height: Option<u64>,
}

/// A pending transaction. Same shape as [`Transaction`] with no height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl From<Transaction> for MempoolEntry {
    fn from(tx: Transaction) -> Self {
        Self {
            txid: tx.txid,
            inputs: tx.inputs,
            outputs: tx.outputs,
        }
    }
}

/// The `(height, hash)` tag attached to every query response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub height: u64,
    pub hash: String,
}

impl From<&BlockHeader> for LatestPointer {
    fn from(header: &BlockHeader) -> Self {
        Self {
            height: header.height,
            hash: header.hash.clone(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u64, hash: &str, parent: &str) -> BlockHeader {
        BlockHeader {
            hash: hash.into(),
            height,
            parent_hash: parent.into(),
            timestamp: height as i64 * 600,
        }
    }

    fn tx(txid: &str, height: Option<u64>) -> Transaction {
        Transaction {
            txid: txid.into(),
            height,
            inputs: vec![TxInput::coinbase()],
            outputs: vec![TxOutput {
                index: 0,
                address: Some("addr".into()),
                value: 50,
                script: "76a9".into(),
            }],
        }
    }

    #[test]
    fn header_extends_parent() {
        let parent = header(100, "aa", "00");
        let child = header(101, "bb", "aa");
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
        assert!(!header(102, "cc", "aa").extends(&parent));
    }

    #[test]
    fn coinbase_input_detection() {
        assert!(TxInput::coinbase().is_coinbase());
        assert!(!TxInput::new(NULL_TXID, 0).is_coinbase());
        assert!(!TxInput::new("ab".repeat(32), NULL_INDEX).is_coinbase());
        assert!(tx("t", None).is_coinbase());
    }

    #[test]
    fn block_validation_rejects_duplicates_and_wrong_hash() {
        let block = Block {
            header: header(5, "h5", "h4"),
            transactions: vec![tx("t1", Some(5)), tx("t1", Some(5))],
        };
        assert!(block.validate("h5").unwrap_err().contains("duplicate"));

        let block = Block {
            header: header(5, "h5", "h4"),
            transactions: vec![tx("t1", Some(5))],
        };
        assert!(block.validate("h5").is_ok());
        assert!(block.validate("other").is_err());
    }

    #[test]
    fn block_validation_rejects_height_mismatch() {
        let block = Block {
            header: header(5, "h5", "h4"),
            transactions: vec![tx("t1", Some(6))],
        };
        assert!(block.validate("h5").is_err());
    }
}
