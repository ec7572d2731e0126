//! Raw response shapes returned by Bitcoin Core, and their conversion into
//! the validated data model.
//!
//! Nothing untyped crosses this module: every conversion either yields a
//! structurally sound value or [`NodeError::Malformed`].

use serde::Deserialize;

use utxoindex_core::types::NULL_TXID;
use utxoindex_core::{Block, BlockHeader, ChainTip, NodeError, Transaction, TxInput, TxOutput};

/// Satoshis per coin.
const COIN: f64 = 100_000_000.0;
/// Upper bound for any single output value, in coins.
const MAX_MONEY: f64 = 21_000_000.0;

/// `getblockchaininfo` (only the fields we read).
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    /// `main`, `test`, `testnet4`, `signet` or `regtest`.
    #[serde(default)]
    pub chain: String,
    pub blocks: u64,
    pub bestblockhash: String,
}

impl From<BlockchainInfo> for ChainTip {
    fn from(info: BlockchainInfo) -> Self {
        ChainTip {
            hash: info.bestblockhash,
            height: info.blocks,
        }
    }
}

/// `getblockheader <hash> true`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHeader {
    pub hash: String,
    pub height: u64,
    /// Absent on the genesis block.
    #[serde(default)]
    pub previousblockhash: Option<String>,
    pub time: i64,
}

impl RawHeader {
    pub fn into_header(self) -> Result<BlockHeader, NodeError> {
        check_hash("block hash", &self.hash)?;
        let parent_hash = match self.previousblockhash {
            Some(parent) => {
                check_hash("previousblockhash", &parent)?;
                parent
            }
            None if self.height == 0 => NULL_TXID.to_string(),
            None => {
                return Err(NodeError::Malformed(format!(
                    "block {} at height {} has no previousblockhash",
                    self.hash, self.height
                )))
            }
        };
        Ok(BlockHeader {
            hash: self.hash,
            height: self.height,
            parent_hash,
            timestamp: self.time,
        })
    }
}

/// `getblock <hash> 2`: header fields plus decoded transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    #[serde(flatten)]
    pub header: RawHeader,
    pub tx: Vec<RawTx>,
}

impl RawBlock {
    pub fn into_block(self) -> Result<Block, NodeError> {
        let header = self.header.into_header()?;
        let transactions = self
            .tx
            .into_iter()
            .map(|tx| tx.into_transaction(Some(header.height)))
            .collect::<Result<Vec<_>, _>>()?;
        let block = Block {
            header,
            transactions,
        };
        let hash = block.header.hash.clone();
        block.validate(&hash).map_err(NodeError::Malformed)?;
        Ok(block)
    }
}

/// A decoded transaction, as embedded in `getblock` or returned by
/// `getrawtransaction <txid> true`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTx {
    pub txid: String,
    pub vin: Vec<RawVin>,
    pub vout: Vec<RawVout>,
    /// Present on confirmed transactions from `getrawtransaction`.
    #[serde(default)]
    pub blockhash: Option<String>,
}

impl RawTx {
    pub fn into_transaction(self, height: Option<u64>) -> Result<Transaction, NodeError> {
        check_hash("txid", &self.txid)?;
        let inputs = self
            .vin
            .into_iter()
            .map(|vin| vin.into_input(&self.txid))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = self
            .vout
            .into_iter()
            .map(|vout| vout.into_output(&self.txid))
            .collect::<Result<Vec<_>, _>>()?;
        let tx = Transaction {
            txid: self.txid,
            height,
            inputs,
            outputs,
        };
        tx.validate().map_err(NodeError::Malformed)?;
        Ok(tx)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVin {
    /// Set (to the coinbase script) on coinbase inputs only.
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
}

impl RawVin {
    fn into_input(self, txid: &str) -> Result<TxInput, NodeError> {
        if self.coinbase.is_some() {
            return Ok(TxInput::coinbase());
        }
        match (self.txid, self.vout) {
            (Some(prev), Some(index)) => {
                check_hash("input txid", &prev)?;
                Ok(TxInput::new(prev, index))
            }
            _ => Err(NodeError::Malformed(format!(
                "transaction {txid} has an input without txid/vout"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVout {
    /// Value in coins.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RawScript,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawScript {
    pub hex: String,
    /// Bitcoin Core 22+.
    #[serde(default)]
    pub address: Option<String>,
    /// Older releases.
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl RawVout {
    fn into_output(self, txid: &str) -> Result<TxOutput, NodeError> {
        let value = to_sats(self.value).ok_or_else(|| {
            NodeError::Malformed(format!(
                "transaction {txid} output {} has invalid value {}",
                self.n, self.value
            ))
        })?;
        let RawScript {
            hex,
            address,
            addresses,
        } = self.script_pub_key;
        if !is_hex(&hex) {
            return Err(NodeError::Malformed(format!(
                "transaction {txid} output {} has a non-hex script",
                self.n
            )));
        }
        let address = address.or_else(|| addresses.and_then(|list| list.into_iter().next()));
        Ok(TxOutput {
            index: self.n,
            address,
            value,
            script: hex,
        })
    }
}

/// Converts a coin amount to satoshis, rejecting values no node would report.
pub fn to_sats(coins: f64) -> Option<u64> {
    if !coins.is_finite() || coins < 0.0 || coins > MAX_MONEY {
        return None;
    }
    Some((coins * COIN).round() as u64)
}

fn check_hash(what: &str, value: &str) -> Result<(), NodeError> {
    if value.len() == 64 && is_hex(value) {
        Ok(())
    } else {
        Err(NodeError::Malformed(format!("invalid {what} {value:?}")))
    }
}

fn is_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn h(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    fn sample_block() -> serde_json::Value {
        json!({
            "hash": h(0xbb),
            "height": 101,
            "previousblockhash": h(0xaa),
            "time": 1_700_000_000,
            "confirmations": 3,
            "tx": [
                {
                    "txid": h(1),
                    "vin": [{ "coinbase": "03a0bb0d", "sequence": 4294967295u64 }],
                    "vout": [
                        { "value": 6.25, "n": 0, "scriptPubKey": { "hex": "0014aa", "address": "bc1qminer" } },
                        { "value": 0.0, "n": 1, "scriptPubKey": { "hex": "6a24aa21a9ed", "type": "nulldata" } }
                    ]
                },
                {
                    "txid": h(2),
                    "vin": [{ "txid": h(9), "vout": 1, "scriptSig": { "hex": "" } }],
                    "vout": [
                        { "value": 0.00005, "n": 0, "scriptPubKey": { "hex": "76a914cc88ac", "addresses": ["1Legacy"] } }
                    ]
                }
            ]
        })
    }

    #[test]
    fn block_converts_with_heights_and_sats() {
        let raw: RawBlock = serde_json::from_value(sample_block()).unwrap();
        let block = raw.into_block().unwrap();
        assert_eq!(block.header.height, 101);
        assert_eq!(block.header.parent_hash, h(0xaa));
        assert_eq!(block.transactions.len(), 2);

        let coinbase = &block.transactions[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.height, Some(101));
        assert_eq!(coinbase.outputs[0].value, 625_000_000);
        assert_eq!(coinbase.outputs[0].address.as_deref(), Some("bc1qminer"));
        assert_eq!(coinbase.outputs[1].address, None);

        let spend = &block.transactions[1];
        assert_eq!(spend.inputs[0], TxInput::new(h(9), 1));
        assert_eq!(spend.outputs[0].value, 5_000);
        assert_eq!(spend.outputs[0].address.as_deref(), Some("1Legacy"));
        assert_eq!(spend.outputs[0].script, "76a914cc88ac");
    }

    #[test]
    fn genesis_has_null_parent() {
        let raw: RawHeader = serde_json::from_value(json!({
            "hash": h(0x11), "height": 0, "time": 1231006505
        }))
        .unwrap();
        assert_eq!(raw.into_header().unwrap().parent_hash, NULL_TXID);
    }

    #[test]
    fn missing_parent_above_genesis_is_malformed() {
        let raw: RawHeader = serde_json::from_value(json!({
            "hash": h(0x11), "height": 5, "time": 0
        }))
        .unwrap();
        assert!(matches!(raw.into_header(), Err(NodeError::Malformed(_))));
    }

    #[test]
    fn bad_values_are_malformed() {
        let mut block = sample_block();
        block["tx"][1]["vout"][0]["value"] = json!(-1.0);
        let raw: RawBlock = serde_json::from_value(block).unwrap();
        assert!(matches!(raw.into_block(), Err(NodeError::Malformed(_))));

        let mut block = sample_block();
        block["tx"][1]["vin"][0] = json!({ "txid": h(9) });
        let raw: RawBlock = serde_json::from_value(block).unwrap();
        assert!(matches!(raw.into_block(), Err(NodeError::Malformed(_))));

        let mut block = sample_block();
        block["tx"][1]["txid"] = json!("not-a-hash");
        let raw: RawBlock = serde_json::from_value(block).unwrap();
        assert!(matches!(raw.into_block(), Err(NodeError::Malformed(_))));
    }

    #[test]
    fn duplicate_output_index_is_malformed() {
        let mut block = sample_block();
        block["tx"][0]["vout"][1]["n"] = json!(0);
        let raw: RawBlock = serde_json::from_value(block).unwrap();
        assert!(matches!(raw.into_block(), Err(NodeError::Malformed(_))));
    }

    #[test]
    fn sats_rounding() {
        assert_eq!(to_sats(0.1), Some(10_000_000));
        assert_eq!(to_sats(0.00000001), Some(1));
        assert_eq!(to_sats(20.5), Some(2_050_000_000));
        assert_eq!(to_sats(f64::NAN), None);
        assert_eq!(to_sats(21_000_001.0), None);
    }
}
