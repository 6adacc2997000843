//! The `Referee` trait: game rules the coordinator consults.

use gamex_protocol::{GameSnapshot, GameSummary};

/// Decides when a game may start, when it is over, and how it ended.
///
/// The coordinator owns the choice log and turn order; the referee only
/// reads snapshots of it. Only the moderator's referee is ever consulted.
pub trait Referee: Send + Sync + 'static {
    /// Checks a game can start from `snapshot`.
    ///
    /// If this returns `Err`, `start_game` fails with `GameRejected` and the
    /// reason. Default: at least two players and one round.
    fn validate_start(&self, snapshot: &GameSnapshot) -> Result<(), String> {
        if snapshot.players.len() < 2 {
            return Err("need at least 2 players".into());
        }
        if snapshot.total_rounds < 1 {
            return Err("need at least 1 round".into());
        }
        Ok(())
    }

    /// Returns `true` if the game is over.
    ///
    /// Called after every accepted choice. When this returns `true`, the
    /// moderator broadcasts `GameOver` with [`summarize`](Self::summarize).
    fn is_finished(&self, snapshot: &GameSnapshot) -> bool;

    /// Builds the final result.
    fn summarize(&self, snapshot: &GameSnapshot) -> GameSummary;
}
