use alloy::rpc::types::Log;
use itertools::Itertools;
use tracing::{debug, warn};

use crate::bindings::GameResult;
use crate::error::DecodeMismatch;
use crate::record::MatchRecord;

/// Decodes one raw log into a match record. Logs that do not carry the
/// `GameResult` signature, have a different data layout, or lack their
/// block/transaction identity are rejected.
pub fn decode_log(log: &Log) -> Result<MatchRecord, DecodeMismatch> {
    let tx_hash = log.transaction_hash.ok_or(DecodeMismatch::NoTxHash)?;
    let log_index = log.log_index.ok_or(DecodeMismatch::NoLogIndex)?;
    let block_number = log.block_number.ok_or(DecodeMismatch::NoBlockNumber)?;

    let event = log.log_decode::<GameResult>()?.inner.data;
    let game_number = u64::try_from(event.gameNumber)?;

    Ok(MatchRecord {
        block_number,
        tx_hash,
        log_index,
        game_number,
        game_id: event.gameId,
        started_at: event.startedAt,
        winning_player: event.winningPlayer,
        winning_classes: event.winningClasses,
        losing_player: event.losingPlayer,
        losing_classes: event.losingClasses,
        game_length: event.gameLength,
        end_reason: event.endReason,
    })
}

/// Decodes every log, dropping the ones that do not decode, and orders the
/// result by block number. Logs from the same block keep their fetch order.
pub fn decode_logs(logs: &[Log]) -> Vec<MatchRecord> {
    let records = logs
        .iter()
        .filter_map(|log| match decode_log(log) {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(
                    "Skipping undecodable log tx={:?} index={:?} block={:?}: {error}",
                    log.transaction_hash, log.log_index, log.block_number
                );
                None
            }
        })
        .sorted_by_key(|record| record.block_number)
        .collect_vec();

    debug!("Decoded {} of {} logs", records.len(), logs.len());

    records
}
