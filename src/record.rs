use alloy::primitives::B256;
use serde::Serialize;
use std::fmt;

/// One decoded `GameResult` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub game_number: u64,
    pub game_id: String,
    pub started_at: String,
    pub winning_player: String,
    pub winning_classes: String,
    pub losing_player: String,
    pub losing_classes: String,
    pub game_length: String,
    pub end_reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlayerStats {
    pub wins: usize,
    pub losses: usize,
    pub total: usize,
    /// `wins / total`, 0 when the player has no games.
    pub winrate: f64,
}

impl PlayerStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn new(wins: usize, losses: usize) -> Self {
        let total = wins + losses;
        let winrate = if total == 0 {
            0.0
        } else {
            wins as f64 / total as f64
        };

        Self {
            wins,
            losses,
            total,
            winrate,
        }
    }

    pub fn winrate_percent(&self) -> f64 {
        self.winrate * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchResult {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "L")]
    Loss,
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Win => f.pad("W"),
            Self::Loss => f.pad("L"),
        }
    }
}

/// A match seen from one player's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerMatchView {
    #[serde(flatten)]
    pub record: MatchRecord,
    pub result: MatchResult,
    pub opponent: String,
}

/// Case-insensitive, whitespace-trimmed form used for every name comparison.
pub fn normalize_player(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Computes `player`'s record over `records` and the matches they took part
/// in, in the order given. Records naming the player on neither side are
/// skipped.
pub fn aggregate(records: &[MatchRecord], player: &str) -> (PlayerStats, Vec<PlayerMatchView>) {
    let player = normalize_player(player);
    let mut wins = 0;
    let mut losses = 0;
    let mut view = Vec::new();

    for record in records {
        let won = normalize_player(&record.winning_player) == player;
        let lost = normalize_player(&record.losing_player) == player;

        if won {
            wins += 1;
        }
        if lost {
            losses += 1;
        }
        if !(won || lost) {
            continue;
        }

        let (result, opponent) = if won {
            (MatchResult::Win, &record.losing_player)
        } else {
            (MatchResult::Loss, &record.winning_player)
        };

        view.push(PlayerMatchView {
            record: record.clone(),
            result,
            opponent: opponent.clone(),
        });
    }

    (PlayerStats::new(wins, losses), view)
}
