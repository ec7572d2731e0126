//! utxoindex-bitcoin — Bitcoin Core JSON-RPC node client for utxoindex.
//!
//! ```rust,no_run
//! use utxoindex_bitcoin::{BitcoinNodeClient, NodeConfig};
//!
//! let node = BitcoinNodeClient::from_config(&NodeConfig {
//!     url: "http://127.0.0.1:8332".into(),
//!     user: Some("rpcuser".into()),
//!     password: Some("rpcpass".into()),
//!     ..Default::default()
//! })?;
//! # Ok::<(), utxoindex_core::NodeError>(())
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod transport;

pub use client::{chain_name, BitcoinNodeClient, NetworkCheckError};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{HttpTransport, NodeConfig, RpcTransport, TransportError};
