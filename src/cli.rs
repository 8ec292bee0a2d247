//! Terminal front end: runs one lookup from [`Env`] and prints the report.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::cancel::{CancelSignal, cancel_pair};
use crate::env::Env;
use crate::lookup::{LookupOutcome, run_lookup_with_progress};
use crate::record::{MatchRecord, MatchResult, PlayerMatchView};
use crate::rpc::{RpcClient, Transport};

pub async fn run(env: Env) -> anyhow::Result<()> {
    run_with_writers(env, &mut std::io::stdout()).await
}

async fn run_with_writers<W: Write + Send>(env: Env, stdout: &mut W) -> anyhow::Result<()> {
    let (handle, cancel) = cancel_pair();

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, canceling lookup...");
            handle.cancel();
        }
    });

    let client = RpcClient::http(env.rpc_url.clone(), env.retry_policy());
    let result = execute_lookup(&env, &client, &cancel, stdout).await;

    ctrl_c.abort();
    result
}

async fn execute_lookup<T: Transport, W: Write + Send>(
    env: &Env,
    client: &RpcClient<T>,
    cancel: &CancelSignal,
    stdout: &mut W,
) -> anyhow::Result<()> {
    let request = env.lookup_request();
    let mut on_progress = |done: usize, total: usize| {
        info!("Fetched {done}/{total} block spans");
    };

    let outcome = match run_lookup_with_progress(client, &request, cancel, &mut on_progress).await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            writeln!(stdout, "❌ Lookup failed: {e}")?;
            if e.is_rate_limited() {
                writeln!(
                    stdout,
                    "   The endpoint is rate limiting requests. Try a smaller --batch-size \
                     (currently {}) or a larger --batch-delay-ms (currently {}).",
                    env.batch_size, env.batch_delay_ms
                )?;
            }
            return Err(e.into());
        }
    };

    render_summary(&outcome, stdout)?;
    render_player_matches(&outcome.player, &outcome.player_view, stdout)?;

    if env.all_matches {
        render_all_matches(&outcome.match_records, stdout)?;
    }

    if let Some(path) = &env.json_out {
        write_json(&outcome, path)?;
        writeln!(stdout, "✅ Wrote JSON report to {}", path.display())?;
    }

    Ok(())
}

pub fn render_summary<W: Write>(outcome: &LookupOutcome, stdout: &mut W) -> std::io::Result<()> {
    let stats = &outcome.stats;

    writeln!(stdout, "Player: {}", outcome.player)?;
    if outcome.range.is_empty() {
        writeln!(stdout, "Blocks: none in the requested dates")?;
    } else {
        writeln!(stdout, "Blocks: {}-{}", outcome.range.from, outcome.range.to)?;
    }
    writeln!(stdout, "Matches in range: {}", outcome.match_records.len())?;
    writeln!(
        stdout,
        "Wins: {}  Losses: {}  Total: {}  Win rate: {:.2}%",
        stats.wins,
        stats.losses,
        stats.total,
        stats.winrate_percent()
    )
}

pub fn render_player_matches<W: Write>(
    player: &str,
    view: &[PlayerMatchView],
    stdout: &mut W,
) -> std::io::Result<()> {
    writeln!(stdout)?;
    if view.is_empty() {
        return writeln!(stdout, "No matches found for {player}");
    }

    writeln!(
        stdout,
        "{:>10}  {:>6}  {:<3}  {:<20}  {:<24}  {:<24}  {:<8}  END REASON",
        "BLOCK", "GAME", "W/L", "OPPONENT", "CLASSES", "OPPONENT CLASSES", "LENGTH"
    )?;

    for entry in view {
        let record = &entry.record;
        let (own_classes, opponent_classes) = match entry.result {
            MatchResult::Win => (&record.winning_classes, &record.losing_classes),
            MatchResult::Loss => (&record.losing_classes, &record.winning_classes),
        };

        writeln!(
            stdout,
            "{:>10}  {:>6}  {:<3}  {:<20}  {:<24}  {:<24}  {:<8}  {}",
            record.block_number,
            record.game_number,
            entry.result,
            entry.opponent,
            own_classes,
            opponent_classes,
            record.game_length,
            record.end_reason
        )?;
    }

    Ok(())
}

pub fn render_all_matches<W: Write>(records: &[MatchRecord], stdout: &mut W) -> std::io::Result<()> {
    writeln!(stdout)?;
    writeln!(stdout, "All matches ({}):", records.len())?;

    for record in records {
        writeln!(
            stdout,
            "{:>10}  {:>6}  {} ({}) beat {} ({}) in {}, {}",
            record.block_number,
            record.game_number,
            record.winning_player,
            record.winning_classes,
            record.losing_player,
            record.losing_classes,
            record.game_length,
            record.end_reason
        )?;
    }

    Ok(())
}

pub fn write_json(outcome: &LookupOutcome, path: &Path) -> anyhow::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, outcome)?;
    writeln!(writer)?;
    writer.flush()?;

    info!("Wrote {} match records to {}", outcome.match_records.len(), path.display());
    Ok(())
}
