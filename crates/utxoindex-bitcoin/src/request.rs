//! JSON-RPC wire types as spoken by Bitcoin Core.
//!
//! Bitcoin Core answers failed calls with an HTTP error status *and* a
//! regular JSON-RPC body, so the body is always worth decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request ID. Bitcoin Core echoes whatever it receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    /// A `1.0` request: accepted by every Bitcoin Core release.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "1.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    pub id: RpcId,
}

impl JsonRpcResponse {
    /// The result value, or the node's error. A missing result is `null`
    /// (`gettxout` on a spent output, for instance).
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Bitcoin Core error codes the client interprets.
pub mod codes {
    /// Unknown block hash, txid, or mempool entry.
    pub const INVALID_ADDRESS_OR_KEY: i64 = -5;
    /// `getblockhash` height out of range.
    pub const INVALID_PARAMETER: i64 = -8;
    /// Node still loading its block index.
    pub const IN_WARMUP: i64 = -28;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_legacy_version() {
        let req = JsonRpcRequest::new(7, "getblockhash", vec![Value::from(100)]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""jsonrpc":"1.0""#));
        assert!(json.contains(r#""params":[100]"#));
    }

    #[test]
    fn error_body_decodes() {
        let body = r#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":3}"#;
        let resp: JsonRpcResponse = serde_json::from_str(body).unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMETER);
    }

    #[test]
    fn null_result_is_ok() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"result":null,"error":null,"id":1}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }
}
