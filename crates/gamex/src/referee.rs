//! The aura rules, wired into the session as its referee.

use gamex_protocol::{GameSnapshot, GameSummary};
use gamex_session::Referee;

/// Plays by the aura rules in `gamex-scoring`: the game runs until every
/// player has had each round, then scores the group's balance.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuraReferee;

impl Referee for AuraReferee {
    fn validate_start(&self, snapshot: &GameSnapshot) -> Result<(), String> {
        gamex_scoring::validate(snapshot).map_err(|invalid| invalid.0.join("; "))
    }

    fn is_finished(&self, snapshot: &GameSnapshot) -> bool {
        gamex_scoring::is_finished(snapshot)
    }

    fn summarize(&self, snapshot: &GameSnapshot) -> GameSummary {
        gamex_scoring::summarize(snapshot)
    }
}
