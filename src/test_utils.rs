use alloy::primitives::{Address, B256, IntoLogData, LogData, U256, address};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::bindings::GameResult;
use crate::error::NetworkError;
use crate::rpc::{HttpReply, RetryPolicy, RpcClient, Transport};

pub const CONTRACT: Address = address!("0x1111111111111111111111111111111111111111");

/// Retries quickly and deterministically so failure paths stay fast.
pub fn fast_client<T: Transport>(transport: T) -> RpcClient<T> {
    RpcClient::new(
        transport,
        RetryPolicy::new(3, Duration::from_millis(1)).with_max_jitter(Duration::ZERO),
    )
}

pub fn reply(status: u16, body: &Value) -> HttpReply {
    HttpReply {
        status,
        body: body.to_string(),
    }
}

/// Every field but the numbers and players is fixed; the values are not
/// important, only that they are deterministic.
pub fn game_event(game_number: u64, winner: &str, loser: &str) -> GameResult {
    GameResult {
        gameNumber: U256::from(game_number),
        gameId: format!("game-{game_number}"),
        startedAt: "2024-03-01T18:00:00Z".to_string(),
        winningPlayer: winner.to_string(),
        winningClasses: "Warrior/Mage".to_string(),
        losingPlayer: loser.to_string(),
        losingClasses: "Rogue/Priest".to_string(),
        gameLength: "12:34".to_string(),
        endReason: "Victory".to_string(),
    }
}

pub fn log_with_data(block_number: u64, tx_byte: u8, log_index: u64, data: LogData) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: CONTRACT,
            data,
        },
        block_hash: None,
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(B256::repeat_byte(tx_byte)),
        transaction_index: None,
        log_index: Some(log_index),
        removed: false,
    }
}

pub fn game_log(
    block_number: u64,
    tx_byte: u8,
    log_index: u64,
    game_number: u64,
    winner: &str,
    loser: &str,
) -> Log {
    log_with_data(
        block_number,
        tx_byte,
        log_index,
        game_event(game_number, winner, loser).to_log_data(),
    )
}

fn parse_quantity(value: &Value) -> Option<u64> {
    let hex = value.as_str()?.strip_prefix("0x")?;
    u64::from_str_radix(hex, 16).ok()
}

fn calls_in(body: &Value) -> Vec<&Value> {
    match body {
        Value::Array(calls) => calls.iter().collect(),
        call => vec![call],
    }
}

/// In-memory chain answering `eth_getBlockByNumber` and `eth_getLogs`, with
/// block `n` at `timestamps[n]`. Records every body it receives.
#[derive(Debug, Default)]
pub struct FakeChain {
    timestamps: Vec<u64>,
    logs: Vec<Log>,
    hidden_block: Option<u64>,
    failing_logs_from: Option<u64>,
    requests: Mutex<Vec<Value>>,
}

impl FakeChain {
    pub fn with_timestamps(timestamps: Vec<u64>) -> Self {
        Self {
            timestamps,
            ..Self::default()
        }
    }

    /// Blocks 12 seconds apart.
    pub fn with_block_count(count: u64) -> Self {
        Self::with_timestamps((0..count).map(|n| 1_700_000_000 + n * 12).collect())
    }

    #[must_use]
    pub fn with_logs(mut self, logs: Vec<Log>) -> Self {
        self.logs = logs;
        self
    }

    /// Answers `null` for this block number, as a pruned node would.
    #[must_use]
    pub fn hiding_block(mut self, number: u64) -> Self {
        self.hidden_block = Some(number);
        self
    }

    /// Answers HTTP 500 to any request containing a log filter starting here.
    #[must_use]
    pub fn failing_logs_from(mut self, from_block: u64) -> Self {
        self.failing_logs_from = Some(from_block);
        self
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Bodies that carried at least one `eth_getLogs` call.
    pub fn log_requests(&self) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|body| {
                calls_in(body)
                    .iter()
                    .any(|call| call["method"] == "eth_getLogs")
            })
            .collect()
    }

    pub fn block_fetches(&self) -> usize {
        self.requests()
            .iter()
            .map(|body| {
                calls_in(body)
                    .into_iter()
                    .filter(|call| call["method"] == "eth_getBlockByNumber")
                    .count()
            })
            .sum()
    }

    fn should_fail(&self, body: &Value) -> bool {
        let Some(failing) = self.failing_logs_from else {
            return false;
        };

        calls_in(body).iter().any(|call| {
            call["method"] == "eth_getLogs"
                && parse_quantity(&call["params"][0]["fromBlock"]) == Some(failing)
        })
    }

    fn answer(&self, call: &Value) -> Value {
        let id = call["id"].clone();
        let result = match call["method"].as_str() {
            Some("eth_getBlockByNumber") => self.block(&call["params"][0]),
            Some("eth_getLogs") => self.logs_in(&call["params"][0]),
            _ => {
                return json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "method not found"}
                });
            }
        };

        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }

    fn block(&self, tag: &Value) -> Value {
        let last = self.timestamps.len().checked_sub(1).map(|n| n as u64);
        let number = match tag.as_str() {
            Some("earliest") => self.timestamps.first().map(|_| 0),
            Some("latest") => last,
            _ => parse_quantity(tag),
        };

        number
            .filter(|number| Some(*number) != self.hidden_block)
            .and_then(|number| {
                let timestamp = self.timestamps.get(usize::try_from(number).ok()?)?;
                Some(json!({
                    "number": format!("{number:#x}"),
                    "timestamp": format!("{timestamp:#x}"),
                    "hash": B256::repeat_byte(0xbb),
                }))
            })
            .unwrap_or(Value::Null)
    }

    fn logs_in(&self, filter: &Value) -> Value {
        let from = parse_quantity(&filter["fromBlock"]).unwrap_or(0);
        let to = parse_quantity(&filter["toBlock"]).unwrap_or(u64::MAX);

        let logs = self
            .logs
            .iter()
            .filter(|log| log.block_number.is_some_and(|block| (from..=to).contains(&block)))
            .collect::<Vec<_>>();

        json!(logs)
    }
}

#[async_trait]
impl Transport for FakeChain {
    async fn post(&self, body: &Value) -> Result<HttpReply, NetworkError> {
        self.requests.lock().unwrap().push(body.clone());

        if self.should_fail(body) {
            return Ok(HttpReply {
                status: 500,
                body: "internal error".to_string(),
            });
        }

        let answer = match body {
            Value::Array(calls) => Value::Array(calls.iter().map(|call| self.answer(call)).collect()),
            call => self.answer(call),
        };

        Ok(reply(200, &answer))
    }
}

/// Plays back a fixed list of replies, one per request.
#[derive(Debug)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpReply, NetworkError>>>,
    requests: Mutex<Vec<Value>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpReply, NetworkError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, body: &Value) -> Result<HttpReply, NetworkError> {
        self.requests.lock().unwrap().push(body.clone());

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(NetworkError("script exhausted".to_string())))
    }
}
