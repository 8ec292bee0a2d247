//! The end-to-end lookup: dates to blocks, blocks to logs, logs to a
//! player's win/loss record.

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::info;

use crate::bindings::GameResult;
use crate::cancel::CancelSignal;
use crate::error::LookupError;
use crate::onchain::backfill::{FetchConfig, LogQuery, fetch_logs_with_progress};
use crate::onchain::blocks::{BlockRange, BlockResolver};
use crate::onchain::decode::decode_logs;
use crate::record::{MatchRecord, PlayerMatchView, PlayerStats, aggregate};
use crate::rpc::{RpcClient, Transport};

#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub contract: Address,
    pub player: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Zone used for day boundaries; the machine's local zone when absent.
    pub timezone: Option<Tz>,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupOutcome {
    pub player: String,
    pub range: BlockRange,
    /// Every decoded match in the range, ascending by block.
    pub match_records: Vec<MatchRecord>,
    pub stats: PlayerStats,
    pub player_view: Vec<PlayerMatchView>,
}

impl LookupOutcome {
    fn empty(player: &str, range: BlockRange) -> Self {
        Self {
            player: player.to_string(),
            range,
            match_records: Vec::new(),
            stats: PlayerStats::new(0, 0),
            player_view: Vec::new(),
        }
    }
}

/// Unix timestamp of 00:00:00 on `date`.
pub fn day_start_timestamp(date: NaiveDate, timezone: Option<Tz>) -> Result<u64, LookupError> {
    let start_of_day = date
        .and_hms_opt(0, 0, 0)
        .ok_or(LookupError::InvalidDate(date))?;
    boundary_timestamp(date, start_of_day, timezone)
}

/// Unix timestamp of 23:59:59 on `date`.
pub fn day_end_timestamp(date: NaiveDate, timezone: Option<Tz>) -> Result<u64, LookupError> {
    let end_of_day = date
        .and_hms_opt(23, 59, 59)
        .ok_or(LookupError::InvalidDate(date))?;
    boundary_timestamp(date, end_of_day, timezone)
}

fn boundary_timestamp(
    date: NaiveDate,
    local: NaiveDateTime,
    timezone: Option<Tz>,
) -> Result<u64, LookupError> {
    // DST folds resolve to the earlier instant.
    let timestamp = match timezone {
        Some(tz) => tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.timestamp()),
        None => Local
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.timestamp()),
    }
    .ok_or(LookupError::InvalidDate(date))?;

    // Pre-1970 boundaries sit before any block anyway.
    Ok(u64::try_from(timestamp).unwrap_or(0))
}

pub async fn run_lookup<T: Transport>(
    client: &RpcClient<T>,
    request: &LookupRequest,
    cancel: &CancelSignal,
) -> Result<LookupOutcome, LookupError> {
    run_lookup_with_progress(client, request, cancel, &mut |_: usize, _: usize| {}).await
}

/// Resolves the date range, fetches and decodes every `GameResult` log in it
/// and aggregates the requested player's record.
#[tracing::instrument(skip_all, fields(player = %request.player), level = tracing::Level::INFO)]
pub async fn run_lookup_with_progress<T: Transport>(
    client: &RpcClient<T>,
    request: &LookupRequest,
    cancel: &CancelSignal,
    on_progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<LookupOutcome, LookupError> {
    let start_ts = request
        .start_date
        .map(|date| day_start_timestamp(date, request.timezone))
        .transpose()?;
    let end_ts = request
        .end_date
        .map(|date| day_end_timestamp(date, request.timezone))
        .transpose()?;

    let range = BlockResolver::new(client, cancel)
        .resolve_range(start_ts, end_ts)
        .await?;

    if range.is_empty() {
        info!(
            "Block range {}-{} is empty, no matches to fetch",
            range.from, range.to
        );
        return Ok(LookupOutcome::empty(&request.player, range));
    }

    let query = LogQuery {
        contract: request.contract,
        topic0: GameResult::SIGNATURE_HASH,
        from_block: range.from,
        to_block: range.to,
    };
    let logs = fetch_logs_with_progress(client, &query, &request.fetch, cancel, on_progress).await?;

    let match_records = decode_logs(&logs);
    let (stats, player_view) = aggregate(&match_records, &request.player);

    info!(
        "Player {:?}: {} wins, {} losses over {} matches in blocks {}-{}",
        request.player,
        stats.wins,
        stats.losses,
        match_records.len(),
        range.from,
        range.to
    );

    Ok(LookupOutcome {
        player: request.player.clone(),
        range,
        match_records,
        stats,
        player_view,
    })
}
