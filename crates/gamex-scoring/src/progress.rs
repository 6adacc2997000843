//! Round bookkeeping and pre-game validation.

use gamex_protocol::GameSnapshot;

/// How far a game has come.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub completed_rounds: u32,
    pub total_rounds: u32,
    pub percentage: f64,
    pub remaining_rounds: u32,
}

/// A game that can't start, with every reason found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid game: {}", .0.join("; "))]
pub struct InvalidGame(pub Vec<String>);

/// A round is complete once every player has made one choice in it.
pub(crate) fn completed_rounds(snapshot: &GameSnapshot) -> u32 {
    match snapshot.players.len() {
        0 => 0,
        n => (snapshot.choices.len() / n) as u32,
    }
}

pub fn progress(snapshot: &GameSnapshot) -> Progress {
    let completed = completed_rounds(snapshot);
    let total = snapshot.total_rounds;
    let percentage = if total == 0 {
        100.0
    } else {
        f64::from(completed.min(total)) / f64::from(total) * 100.0
    };
    Progress {
        completed_rounds: completed,
        total_rounds: total,
        percentage,
        remaining_rounds: total.saturating_sub(completed),
    }
}

/// Checks a snapshot is playable: at least two players and one round.
pub fn validate(snapshot: &GameSnapshot) -> Result<(), InvalidGame> {
    let mut errors = Vec::new();
    if snapshot.players.len() < 2 {
        errors.push("need at least 2 players".to_owned());
    }
    if snapshot.total_rounds < 1 {
        errors.push("need at least 1 round".to_owned());
    }
    if errors.is_empty() { Ok(()) } else { Err(InvalidGame(errors)) }
}

/// Splits `total_rounds` as evenly as possible; earlier players get the
/// remainder.
pub fn rounds_per_player(total_rounds: u32, player_count: usize) -> Vec<u32> {
    if player_count == 0 {
        return Vec::new();
    }
    let count = player_count as u32;
    let base = total_rounds / count;
    let remainder = total_rounds % count;
    (0..count).map(|i| base + u32::from(i < remainder)).collect()
}
