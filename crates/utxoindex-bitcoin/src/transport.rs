//! HTTP transport for Bitcoin Core JSON-RPC, backed by `reqwest`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use utxoindex_core::NodeError;

use crate::request::{codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Errors below the typed client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, timed out, or a 5xx without an RPC body.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The node rejected the credentials.
    #[error("unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// A JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The body was not a JSON-RPC response.
    #[error("undecodable response: {0}")]
    Deserialization(String),
}

impl From<TransportError> for NodeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Http(msg) => NodeError::Transient(msg),
            TransportError::Unauthorized { status } => NodeError::Rpc {
                code: status as i64,
                message: "unauthorized".into(),
            },
            TransportError::Rpc(err) => match err.code {
                codes::INVALID_ADDRESS_OR_KEY | codes::INVALID_PARAMETER => {
                    NodeError::NotFound(err.message)
                }
                codes::IN_WARMUP => NodeError::Transient(err.message),
                code => NodeError::Rpc {
                    code,
                    message: err.message,
                },
            },
            TransportError::Deserialization(msg) => NodeError::Malformed(msg),
        }
    }
}

/// A JSON-RPC call surface. The HTTP implementation is [`HttpTransport`].
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError>;
}

/// Connection settings for the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout_ms: u64,
    /// Chain the node must be on (`mainnet`, `testnet`, `signet`, `regtest`).
    /// Unset skips the check.
    pub network: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".into(),
            user: None,
            password: None,
            request_timeout_ms: 30_000,
            network: None,
        }
    }
}

/// One POST per call, HTTP basic auth.
pub struct HttpTransport {
    url: String,
    user: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(config: &NodeConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let mut builder = self.http.post(&self.url).json(&req);
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_ref());
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized {
                status: status.as_u16(),
            });
        }
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(decoded) => {
                tracing::trace!(method, id, status = status.as_u16(), "rpc response");
                decoded.into_result().map_err(TransportError::Rpc)
            }
            Err(_) if !status.is_success() => Err(TransportError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            ))),
            Err(e) => Err(TransportError::Deserialization(format!("{method}: {e}"))),
        }
    }
}
