use alloy::primitives::U64;
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::RpcError;
use crate::onchain::blocks::BlockRef;

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes that describe a broken request rather than a busy
/// endpoint. Retrying them cannot succeed.
const FATAL_ERROR_CODES: [i64; 4] = [-32700, -32600, -32601, -32602];

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse {
    #[serde(default)]
    pub(crate) id: Option<u64>,
    #[serde(default)]
    pub(crate) result: Option<Value>,
    #[serde(default)]
    pub(crate) error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl ErrorObject {
    pub fn is_fatal(&self) -> bool {
        FATAL_ERROR_CODES.contains(&self.code)
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Block selector accepted by `eth_getBlockByNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Earliest,
    Latest,
    Number(u64),
}

impl BlockTag {
    pub fn as_param(self) -> String {
        match self {
            Self::Earliest => "earliest".to_string(),
            Self::Latest => "latest".to_string(),
            Self::Number(number) => format!("{number:#x}"),
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => f.write_str("earliest"),
            Self::Latest => f.write_str("latest"),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

/// The two fields of an `eth_getBlockByNumber` result the resolver needs.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockLookup {
    pub number: U64,
    pub timestamp: U64,
}

impl BlockLookup {
    /// `null` means the node does not know the block.
    pub fn from_result(result: Value) -> Result<Option<Self>, RpcError> {
        if result.is_null() {
            return Ok(None);
        }

        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| RpcError::MalformedResponse(format!("block lookup: {e}")))
    }
}

impl From<BlockLookup> for BlockRef {
    fn from(lookup: BlockLookup) -> Self {
        Self {
            number: lookup.number.to::<u64>(),
            timestamp: lookup.timestamp.to::<u64>(),
        }
    }
}

/// Logs returned by one `eth_getLogs` request.
#[derive(Debug, Clone, Default)]
pub struct LogBatch(pub Vec<Log>);

impl LogBatch {
    pub fn from_result(result: Value) -> Result<Self, RpcError> {
        serde_json::from_value(result)
            .map(Self)
            .map_err(|e| RpcError::MalformedResponse(format!("log batch: {e}")))
    }
}
