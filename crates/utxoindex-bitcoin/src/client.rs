//! [`NodeClient`] over Bitcoin Core JSON-RPC.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use utxoindex_core::{Block, BlockHeader, ChainTip, NodeClient, NodeError, Transaction};

use crate::response::{BlockchainInfo, RawBlock, RawHeader, RawTx};
use crate::transport::{HttpTransport, NodeConfig, RpcTransport};

/// Why [`BitcoinNodeClient::ensure_network`] refused a node.
#[derive(Debug, Error)]
pub enum NetworkCheckError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("node is on chain '{reported}' but '{expected}' is configured")]
    Mismatch { expected: String, reported: String },
}

/// Map the common spellings of a network onto Bitcoin Core's chain names.
pub fn chain_name(network: &str) -> String {
    let lower = network.trim().to_ascii_lowercase();
    match lower.as_str() {
        "main" | "mainnet" | "livenet" | "bitcoin" => "main".into(),
        "test" | "testnet" | "testnet3" => "test".into(),
        _ => lower,
    }
}

/// Typed node access. One RPC per call, no retries: the sync loop owns
/// the retry policy.
pub struct BitcoinNodeClient<T = HttpTransport> {
    transport: T,
}

impl BitcoinNodeClient<HttpTransport> {
    /// Connects over HTTP using `config`.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let transport = HttpTransport::new(config)?;
        tracing::debug!(url = %transport.url(), "bitcoin node client created");
        Ok(Self::new(transport))
    }
}

impl<T: RpcTransport> BitcoinNodeClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Chain name the node reports in `getblockchaininfo`.
    pub async fn network(&self) -> Result<String, NodeError> {
        let info: BlockchainInfo = self.call("getblockchaininfo", vec![]).await?;
        if info.chain.is_empty() {
            return Err(NodeError::Malformed("getblockchaininfo: missing chain".into()));
        }
        Ok(info.chain)
    }

    /// Fails unless the node runs the `expected` network.
    pub async fn ensure_network(&self, expected: &str) -> Result<(), NetworkCheckError> {
        let reported = self.network().await?;
        if chain_name(&reported) != chain_name(expected) {
            return Err(NetworkCheckError::Mismatch {
                expected: expected.to_string(),
                reported,
            });
        }
        Ok(())
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R, NodeError> {
        let value = self.transport.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| NodeError::Malformed(format!("{method}: {e}")))
    }
}

#[async_trait]
impl<T: RpcTransport> NodeClient for BitcoinNodeClient<T> {
    async fn get_tip(&self) -> Result<ChainTip, NodeError> {
        let info: BlockchainInfo = self.call("getblockchaininfo", vec![]).await?;
        Ok(info.into())
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        self.call("getblockhash", vec![json!(height)]).await
    }

    async fn get_block_header(&self, hash: &str) -> Result<BlockHeader, NodeError> {
        let raw: RawHeader = self.call("getblockheader", vec![json!(hash), json!(true)]).await?;
        raw.into_header()
    }

    async fn get_block(&self, hash: &str) -> Result<Block, NodeError> {
        let raw: RawBlock = self.call("getblock", vec![json!(hash), json!(2)]).await?;
        raw.into_block()
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Transaction, NodeError> {
        let raw: RawTx = self
            .call("getrawtransaction", vec![json!(txid), json!(true)])
            .await?;
        let height = match &raw.blockhash {
            Some(blockhash) => Some(self.get_block_header(blockhash).await?.height),
            None => None,
        };
        raw.into_transaction(height)
    }

    async fn list_pending(&self) -> Result<Vec<String>, NodeError> {
        self.call("getrawmempool", vec![]).await
    }

    async fn is_still_pending(&self, txid: &str) -> Result<bool, NodeError> {
        match self.call::<Value>("getmempoolentry", vec![json!(txid)]).await {
            Ok(_) => Ok(true),
            Err(NodeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_output_unspent(&self, txid: &str, vout: u32) -> Result<bool, NodeError> {
        // Mempool spends excluded: only the best chain counts.
        let out: Value = self
            .call("gettxout", vec![json!(txid), json!(vout), json!(false)])
            .await?;
        Ok(!out.is_null())
    }
}
