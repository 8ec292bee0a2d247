//! JSON-RPC client used for every chain read.
//!
//! Each call goes through [`RetryPolicy`]: HTTP 408/429/5xx, network failures
//! and non-fatal JSON-RPC errors are retried with backoff, while malformed
//! requests and other HTTP 4xx fail immediately.

use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use backon::Retryable;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{NetworkError, RpcError};
use crate::onchain::blocks::BlockRef;

pub mod retry;
mod types;

pub use retry::RetryPolicy;
pub use types::{BlockLookup, BlockTag, ErrorObject, LogBatch, RpcRequest};

use types::{JSONRPC_VERSION, RpcResponse};

/// Longest slice of a response body quoted in error messages.
const BODY_SNIPPET_LEN: usize = 200;

/// Status and body of an HTTP exchange, before any JSON-RPC interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Sends one JSON body (a single request object or a batch array) to the
/// endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, body: &Value) -> Result<HttpReply, NetworkError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, body: &Value) -> Result<HttpReply, NetworkError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| NetworkError(e.to_string()))?;

        Ok(HttpReply { status, body })
    }
}

/// Outcome of one attempt, before the retry policy decides what to do.
#[derive(Debug)]
enum AttemptError {
    Retryable(String),
    Fatal(RpcError),
}

impl AttemptError {
    const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

#[derive(Debug)]
pub struct RpcClient<T> {
    transport: T,
    policy: RetryPolicy,
    next_id: AtomicU64,
}

impl RpcClient<HttpTransport> {
    pub fn http(url: Url, policy: RetryPolicy) -> Self {
        Self::new(HttpTransport::new(url), policy)
    }
}

impl<T: Transport> RpcClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            next_id: AtomicU64::new(1),
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn get_block(&self, tag: BlockTag) -> Result<Option<BlockRef>, RpcError> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                Value::Array(vec![Value::String(tag.as_param()), Value::Bool(false)]),
            )
            .await?;

        Ok(BlockLookup::from_result(result)?.map(BlockRef::from))
    }

    /// Runs every filter as one element of a single batched request. The
    /// returned batches line up with `filters`.
    pub async fn get_logs_batch(&self, filters: &[Filter]) -> Result<Vec<Vec<Log>>, RpcError> {
        let calls = filters
            .iter()
            .map(|filter| Ok(("eth_getLogs", Value::Array(vec![serde_json::to_value(filter)?]))))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        self.call_batch(&calls)
            .await?
            .into_iter()
            .map(|result| LogBatch::from_result(result).map(|batch| batch.0))
            .collect()
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id(),
            method,
            params,
        };
        let body = serde_json::to_value(&request)?;

        self.send_with_retry(method, &body, |reply| {
            let response = parse_single(reply)?;
            Ok(response.result.unwrap_or(Value::Null))
        })
        .await
    }

    /// Sends all calls as one JSON array. Results are matched back to their
    /// requests by id, so the endpoint may answer in any order.
    pub async fn call_batch(&self, calls: &[(&str, Value)]) -> Result<Vec<Value>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let requests = calls
            .iter()
            .map(|(method, params)| RpcRequest {
                jsonrpc: JSONRPC_VERSION,
                id: self.next_id(),
                method,
                params: params.clone(),
            })
            .collect::<Vec<_>>();
        let ids = requests.iter().map(|request| request.id).collect::<Vec<_>>();
        let body = serde_json::to_value(&requests)?;

        self.send_with_retry("batch", &body, |reply| parse_batch(reply, &ids))
            .await
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_with_retry<R>(
        &self,
        label: &str,
        body: &Value,
        interpret: impl Fn(HttpReply) -> Result<R, AttemptError> + Send + Sync,
    ) -> Result<R, RpcError> {
        let interpret = &interpret;
        let attempt = || async move {
            let reply = self
                .transport
                .post(body)
                .await
                .map_err(|e| AttemptError::Retryable(format!("network error: {e}")))?;

            check_status(&reply)?;
            interpret(reply)
        };

        let result = attempt
            .retry(self.policy)
            .when(AttemptError::is_retryable)
            .notify(|error: &AttemptError, delay: Duration| {
                warn!("RPC {label} attempt failed, retrying in {delay:?}: {error:?}");
            })
            .await;

        match result {
            Ok(value) => {
                debug!("RPC {label} succeeded");
                Ok(value)
            }
            Err(AttemptError::Retryable(message)) => {
                warn!(
                    "RPC {label} giving up after {} attempts: {message}",
                    self.policy.total_attempts()
                );
                Err(RpcError::Transport {
                    attempts: self.policy.total_attempts(),
                    message,
                })
            }
            Err(AttemptError::Fatal(error)) => Err(error),
        }
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

fn check_status(reply: &HttpReply) -> Result<(), AttemptError> {
    match reply.status {
        200..=299 => Ok(()),
        408 | 429 | 500..=599 => Err(AttemptError::Retryable(format!(
            "HTTP {}: {}",
            reply.status,
            snippet(&reply.body)
        ))),
        status => Err(AttemptError::Fatal(RpcError::HttpStatus {
            status,
            message: snippet(&reply.body),
        })),
    }
}

fn classify(error: &ErrorObject) -> AttemptError {
    if error.is_fatal() {
        AttemptError::Fatal(RpcError::Rejected {
            code: error.code,
            message: error.message.clone(),
        })
    } else {
        AttemptError::Retryable(error.to_string())
    }
}

fn parse_body(reply: &HttpReply) -> Result<Value, AttemptError> {
    serde_json::from_str(&reply.body).map_err(|e| {
        AttemptError::Retryable(format!(
            "invalid JSON in response ({e}): {}",
            snippet(&reply.body)
        ))
    })
}

fn parse_response(value: Value) -> Result<RpcResponse, AttemptError> {
    serde_json::from_value(value)
        .map_err(|e| AttemptError::Retryable(format!("unexpected response shape: {e}")))
}

fn parse_single(reply: HttpReply) -> Result<RpcResponse, AttemptError> {
    let response = parse_response(parse_body(&reply)?)?;

    match response.error {
        Some(error) => Err(classify(&error)),
        None => Ok(response),
    }
}

fn parse_batch(reply: HttpReply, ids: &[u64]) -> Result<Vec<Value>, AttemptError> {
    let elements = match parse_body(&reply)? {
        Value::Array(elements) => elements,
        // Some endpoints answer a throttled batch with a single error object.
        single @ Value::Object(_) => {
            let response = parse_response(single)?;
            return Err(response.error.as_ref().map_or_else(
                || AttemptError::Retryable("batch answered with a single object".to_string()),
                classify,
            ));
        }
        other => {
            return Err(AttemptError::Retryable(format!(
                "batch answered with {}",
                snippet(&other.to_string())
            )));
        }
    };

    let responses = elements
        .into_iter()
        .map(parse_response)
        .collect::<Result<Vec<_>, _>>()?;

    let errors = responses
        .iter()
        .filter_map(|response| response.error.as_ref())
        .collect::<Vec<_>>();

    if let Some(fatal) = errors.iter().find(|error| error.is_fatal()) {
        return Err(classify(fatal));
    }
    if let Some(first) = errors.first() {
        return Err(AttemptError::Retryable(format!(
            "{} of {} batch elements failed, first: {first}",
            errors.len(),
            ids.len()
        )));
    }

    let mut by_id = responses
        .into_iter()
        .filter_map(|response| Some((response.id?, response.result.unwrap_or(Value::Null))))
        .collect::<HashMap<_, _>>();

    ids.iter()
        .map(|id| {
            by_id.remove(id).ok_or_else(|| {
                AttemptError::Retryable(format!("batch response is missing id {id}"))
            })
        })
        .collect()
}
