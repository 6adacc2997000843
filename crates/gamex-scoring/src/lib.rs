//! Scoring for Gamex.
//!
//! Pure functions over a [`GameSnapshot`]'s choice log. Nothing here keeps
//! state or touches the network; the session layer calls in after each
//! accepted choice to decide whether the game is over.
//!
//! [`GameSnapshot`]: gamex_protocol::GameSnapshot

mod averages;
mod progress;
mod safety;
mod verdict;

pub use averages::{
    distribution, global_averages, individual_averages, least_chosen,
    most_chosen, CategoryCount, Distribution,
};
pub use progress::{progress, rounds_per_player, validate, InvalidGame, Progress};
pub use safety::{safe_score, SafeScore};
pub use verdict::{check_bingo, replay_narrative, BingoCheck, BINGO_REASON};

use gamex_protocol::{GameSnapshot, GameSummary};

/// Returns `true` once every player has had `total_rounds` turns.
pub fn is_finished(snapshot: &GameSnapshot) -> bool {
    progress(snapshot).remaining_rounds == 0
}

/// Builds the final result broadcast in `GameOver`.
pub fn summarize(snapshot: &GameSnapshot) -> GameSummary {
    let check = check_bingo(snapshot);
    let safe = safe_score(&check.averages);
    let progress = progress(snapshot);

    GameSummary {
        verdict: check.verdict,
        reason: check.reason,
        safe_score: safe.score,
        safety: safe.band,
        safety_label: safe.label.to_owned(),
        global: check.averages,
        completed_rounds: progress.completed_rounds,
        total_rounds: progress.total_rounds,
        total_choices: snapshot.choices.len(),
    }
}
