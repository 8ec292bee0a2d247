//! Error types for each layer of the lookup pipeline.
//! RPC failures, pipeline failures and per-log decode failures stay separate so
//! callers can tell fatal conditions from entries that are simply skipped.

use alloy::primitives::ruint::FromUintError;
use chrono::NaiveDate;

/// A request never produced an HTTP reply (connection refused, reset, timeout).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct NetworkError(pub String);

/// Failures surfaced by the JSON-RPC client after its retry budget is spent,
/// or immediately for conditions that retrying cannot fix.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC call failed after {attempts} attempts: {message}")]
    Transport { attempts: usize, message: String },
    #[error("RPC request rejected with code {code}: {message}")]
    Rejected { code: i64, message: String },
    #[error("RPC endpoint answered HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),
    #[error("Failed to encode RPC request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fatal outcome of a whole lookup. Empty and clamped ranges are not errors.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Lookup canceled")]
    Canceled,
    #[error("Block {0} not found")]
    BlockNotFound(String),
    #[error("Date {0} has no valid time in the selected timezone")]
    InvalidDate(NaiveDate),
}

impl LookupError {
    /// True when the failure text points at endpoint throttling, in which
    /// case smaller batches or a longer inter-batch delay usually help.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Rpc(RpcError::HttpStatus { status: 429, .. }) => true,
            Self::Rpc(RpcError::Transport { message, .. }) => {
                message.starts_with("HTTP 429") || mentions_rate_limit(message)
            }
            Self::Rpc(RpcError::Rejected { message, .. }) => mentions_rate_limit(message),
            _ => false,
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit") || message.contains("too many requests")
}

/// Why a single raw log could not become a match record. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum DecodeMismatch {
    #[error("No transaction hash found in log")]
    NoTxHash,
    #[error("No log index found in log")]
    NoLogIndex,
    #[error("No block number found in log")]
    NoBlockNumber,
    #[error("Event data does not match the GameResult layout: {0}")]
    Abi(#[from] alloy::sol_types::Error),
    #[error("Game number does not fit in 64 bits: {0}")]
    GameNumberOverflow(#[from] FromUintError<u64>),
}
