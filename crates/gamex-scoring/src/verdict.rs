//! Bingo detection.

use gamex_protocol::{EmotionAverages, GameSnapshot, Verdict};

use crate::averages::global_averages;
use crate::progress::completed_rounds;

pub const BINGO_REASON: &str = "Equilibrium achieved — perfect resonance!";
pub(crate) const ROUNDS_PENDING_REASON: &str = "Minimum rounds not reached.";
const LOVE_DOMINANT_REASON: &str = "Love burns too bright; cool down to connect.";
const FRIENDSHIP_LOW_REASON: &str = "Friendship must rise before passion aligns.";
const UNSETTLED_REASON: &str = "The balance hasn't settled yet. Keep looping.";
const CLOSE_NARRATIVE: &str = "You're close, but the aura isn't balanced yet.";

/// Outcome of [`check_bingo`].
#[derive(Debug, Clone, PartialEq)]
pub struct BingoCheck {
    pub verdict: Verdict,
    pub reason: String,
    pub averages: EmotionAverages,
    /// Mean of the friendship and passion shares.
    pub balance: f64,
}

/// Bingo when every player has finished `total_rounds` turns and the mean
/// of friendship and passion outweighs love.
pub fn check_bingo(snapshot: &GameSnapshot) -> BingoCheck {
    let averages = global_averages(&snapshot.choices);
    let balance = (averages.friendship + averages.passion) / 2.0;

    let (verdict, reason) = if completed_rounds(snapshot) < snapshot.total_rounds {
        (Verdict::Replay, ROUNDS_PENDING_REASON)
    } else if balance > averages.love {
        (Verdict::Bingo, BINGO_REASON)
    } else if averages.love > averages.friendship && averages.love > averages.passion {
        (Verdict::Replay, LOVE_DOMINANT_REASON)
    } else if averages.love > balance {
        (Verdict::Replay, FRIENDSHIP_LOW_REASON)
    } else {
        (Verdict::Replay, UNSETTLED_REASON)
    };

    BingoCheck {
        verdict,
        reason: reason.to_owned(),
        averages,
        balance,
    }
}

/// A line of flavour text for the replay screen.
pub fn replay_narrative(averages: &EmotionAverages) -> &'static str {
    if averages.love > averages.friendship && averages.love > averages.passion {
        LOVE_DOMINANT_REASON
    } else if averages.friendship < averages.passion {
        FRIENDSHIP_LOW_REASON
    } else {
        CLOSE_NARRATIVE
    }
}
