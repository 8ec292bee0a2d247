use alloy::primitives::{Address, B256};
use alloy::rpc::types::{Filter, Log};
use itertools::Itertools;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::error::LookupError;
use crate::rpc::{RpcClient, Transport};

/// Widest block span a single `eth_getLogs` request may cover.
pub const MAX_SPAN: u64 = 100_000;
pub const MAX_BATCH_SIZE: usize = 8;

const DEFAULT_BATCH_SIZE: usize = 2;
const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub from: u64,
    pub to: u64,
}

impl BlockSpan {
    pub const fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    /// Spans sent together in one batched request, 1..=8.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

impl FetchConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

/// Where to look for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub contract: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

/// Splits `[start_block, end_block]` into consecutive spans of at most
/// [`MAX_SPAN`] blocks. Returns nothing when `end_block < start_block`.
pub fn generate_spans(start_block: u64, end_block: u64) -> Vec<BlockSpan> {
    if end_block < start_block {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut from = start_block;
    loop {
        let to = from.saturating_add(MAX_SPAN - 1).min(end_block);
        spans.push(BlockSpan { from, to });

        if to == end_block {
            break;
        }
        from = to + 1;
    }

    spans
}

fn span_filter(query: &LogQuery, span: BlockSpan) -> Filter {
    Filter::new()
        .address(query.contract)
        .from_block(span.from)
        .to_block(span.to)
        .event_signature(query.topic0)
}

pub async fn fetch_logs<T: Transport>(
    client: &RpcClient<T>,
    query: &LogQuery,
    config: &FetchConfig,
    cancel: &CancelSignal,
) -> Result<Vec<Log>, LookupError> {
    fetch_logs_with_progress(client, query, config, cancel, &mut |_: usize, _: usize| {}).await
}

/// Fetches every log in the query range, one batched request per
/// `batch_size` spans, sequentially and throttled by `batch_delay`.
///
/// `on_progress` receives `(spans_done, spans_total)` after each batch. Any
/// batch that still fails after the client's retries aborts the whole fetch.
#[tracing::instrument(
    skip_all,
    fields(from_block = query.from_block, to_block = query.to_block),
    level = tracing::Level::DEBUG
)]
pub async fn fetch_logs_with_progress<T: Transport>(
    client: &RpcClient<T>,
    query: &LogQuery,
    config: &FetchConfig,
    cancel: &CancelSignal,
    on_progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<Vec<Log>, LookupError> {
    let spans = generate_spans(query.from_block, query.to_block);
    let total_spans = spans.len();
    let batch_size = config.effective_batch_size();

    if total_spans == 0 {
        debug!(
            "Empty block range {}-{}, nothing to fetch",
            query.from_block, query.to_block
        );
        return Ok(Vec::new());
    }

    info!(
        "Fetching logs for blocks {}-{} in {total_spans} spans, {batch_size} spans per batch",
        query.from_block, query.to_block
    );

    let mut logs = Vec::new();
    let mut spans_done = 0;

    for (batch_index, batch) in spans.chunks(batch_size).enumerate() {
        if batch_index > 0 && !config.batch_delay.is_zero() {
            cancel.sleep(config.batch_delay).await?;
        }
        let filters = batch
            .iter()
            .map(|span| span_filter(query, *span))
            .collect_vec();

        let batch_logs = cancel.race(client.get_logs_batch(&filters)).await?;
        let found = batch_logs.iter().map(Vec::len).sum::<usize>();
        logs.extend(batch_logs.into_iter().flatten());

        spans_done += batch.len();
        debug!(
            "Batch {batch_index}: blocks {}-{} returned {found} logs ({spans_done}/{total_spans} spans)",
            batch[0].from,
            batch[batch.len() - 1].to
        );
        on_progress(spans_done, total_spans);
    }

    let fetched = logs.len();
    let logs = dedup_logs(logs);
    info!(
        "Fetched {fetched} logs, {} unique after dedup",
        logs.len()
    );

    Ok(logs)
}

/// Keeps one log per `(transaction_hash, log_index)`, preserving fetch order.
/// Logs without a full identity are kept as-is.
pub fn dedup_logs(logs: Vec<Log>) -> Vec<Log> {
    let mut seen = HashSet::new();

    logs.into_iter()
        .filter(|log| match (log.transaction_hash, log.log_index) {
            (Some(tx_hash), Some(log_index)) => seen.insert((tx_hash, log_index)),
            _ => true,
        })
        .collect()
}
