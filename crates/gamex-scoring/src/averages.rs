//! Category counts and percentages.

use std::collections::HashMap;

use gamex_protocol::{ChoiceRecord, EmotionAverages, EmotionCategory, PeerId, PlayerInfo};

/// How many times each category was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Distribution {
    pub love: usize,
    pub friendship: usize,
    pub passion: usize,
}

impl Distribution {
    pub fn get(&self, category: EmotionCategory) -> usize {
        match category {
            EmotionCategory::Love => self.love,
            EmotionCategory::Friendship => self.friendship,
            EmotionCategory::Passion => self.passion,
        }
    }

    pub fn total(&self) -> usize {
        self.love + self.friendship + self.passion
    }

    fn add(&mut self, category: EmotionCategory) {
        match category {
            EmotionCategory::Love => self.love += 1,
            EmotionCategory::Friendship => self.friendship += 1,
            EmotionCategory::Passion => self.passion += 1,
        }
    }

    fn averages(&self) -> EmotionAverages {
        let total = self.total();
        if total == 0 {
            return EmotionAverages::default();
        }
        let pct = |n: usize| n as f64 / total as f64 * 100.0;
        EmotionAverages {
            love: pct(self.love),
            friendship: pct(self.friendship),
            passion: pct(self.passion),
        }
    }
}

/// One category with its count and share of all choices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryCount {
    pub category: EmotionCategory,
    pub count: usize,
    pub percentage: f64,
}

pub fn distribution(choices: &[ChoiceRecord]) -> Distribution {
    let mut dist = Distribution::default();
    for choice in choices {
        dist.add(choice.category);
    }
    dist
}

/// Percentages over every choice. All zeros for an empty log.
pub fn global_averages(choices: &[ChoiceRecord]) -> EmotionAverages {
    distribution(choices).averages()
}

/// Percentages per player.
///
/// Only roster members who made at least one choice get an entry; choices
/// from ids not on the roster are ignored.
pub fn individual_averages(
    players: &[PlayerInfo],
    choices: &[ChoiceRecord],
) -> HashMap<PeerId, EmotionAverages> {
    let mut counts: HashMap<&PeerId, Distribution> =
        players.iter().map(|p| (&p.id, Distribution::default())).collect();
    for choice in choices {
        if let Some(dist) = counts.get_mut(&choice.player_id) {
            dist.add(choice.category);
        }
    }
    counts
        .into_iter()
        .filter(|(_, dist)| dist.total() > 0)
        .map(|(id, dist)| (id.clone(), dist.averages()))
        .collect()
}

/// The most picked category. Ties go to the earlier category in
/// [`EmotionCategory::ALL`]; an empty log reports love with a zero count.
pub fn most_chosen(choices: &[ChoiceRecord]) -> CategoryCount {
    pick(choices, |candidate, best| candidate > best)
}

/// The least picked category, with the same tie rule as [`most_chosen`].
pub fn least_chosen(choices: &[ChoiceRecord]) -> CategoryCount {
    pick(choices, |candidate, best| candidate < best)
}

fn pick(choices: &[ChoiceRecord], better: impl Fn(usize, usize) -> bool) -> CategoryCount {
    let dist = distribution(choices);
    let mut best = EmotionCategory::ALL[0];
    for category in EmotionCategory::ALL.into_iter().skip(1) {
        if better(dist.get(category), dist.get(best)) {
            best = category;
        }
    }
    let count = dist.get(best);
    let percentage = if choices.is_empty() {
        0.0
    } else {
        count as f64 / choices.len() as f64 * 100.0
    };
    CategoryCount {
        category: best,
        count,
        percentage,
    }
}
