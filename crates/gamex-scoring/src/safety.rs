use gamex_protocol::{EmotionAverages, SafetyBand};

/// Safe-play score: the share of choices that were *not* love.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafeScore {
    pub score: f64,
    pub band: SafetyBand,
    pub label: &'static str,
}

pub fn safe_score(averages: &EmotionAverages) -> SafeScore {
    let score = 100.0 - averages.love;
    let (band, label) = if score >= 60.0 {
        (SafetyBand::Safe, "Calm connection")
    } else if score >= 30.0 {
        (SafetyBand::Caution, "Emotional flux")
    } else {
        (SafetyBand::Unsafe, "Overheated")
    };
    SafeScore { score, band, label }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_love(love: f64) -> EmotionAverages {
        EmotionAverages { love, friendship: 0.0, passion: 100.0 - love }
    }

    #[test]
    fn test_safe_score_band_edges() {
        assert_eq!(safe_score(&with_love(40.0)).band, SafetyBand::Safe);
        assert_eq!(safe_score(&with_love(40.5)).band, SafetyBand::Caution);
        assert_eq!(safe_score(&with_love(70.0)).band, SafetyBand::Caution);
        assert_eq!(safe_score(&with_love(70.5)).band, SafetyBand::Unsafe);
    }

    #[test]
    fn test_safe_score_labels() {
        assert_eq!(safe_score(&with_love(0.0)).label, "Calm connection");
        assert_eq!(safe_score(&with_love(50.0)).label, "Emotional flux");
        assert_eq!(safe_score(&with_love(100.0)).label, "Overheated");
        assert_eq!(safe_score(&with_love(100.0)).score, 0.0);
    }
}
