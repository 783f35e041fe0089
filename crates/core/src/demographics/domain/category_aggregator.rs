use std::time::{Duration, Instant};

use crate::demographics::domain::age_category::{AgeCategory, Gender};
use crate::demographics::domain::observation::DetectionObservation;
use crate::shared::constants::{DEFAULT_DOMINANCE_PERCENT, DEFAULT_WINDOW_HORIZON};

/// Scene-level verdict. Both fields are `None` when no category holds the
/// required share of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DominantCategory {
    pub category: Option<AgeCategory>,
    pub gender: Option<Gender>,
}

impl DominantCategory {
    pub const NONE: DominantCategory = DominantCategory {
        category: None,
        gender: None,
    };
}

#[derive(Debug)]
struct CategoryTally {
    category: AgeCategory,
    count: usize,
    male: usize,
    female: usize,
}

/// Computes the dominant category among observations younger than
/// `horizon` at `now`.
///
/// Categories are visited in order of first appearance and the first one
/// holding at least `dominance_percent` of the surviving observations wins,
/// so at an exact 50/50 split the earlier category is reported. The winning
/// category's gender is whichever of male/female has strictly more votes.
pub fn dominant_category(
    observations: &[DetectionObservation],
    now: Instant,
    horizon: Duration,
    dominance_percent: f64,
) -> DominantCategory {
    let mut tallies: Vec<CategoryTally> = Vec::new();
    let mut total = 0usize;

    for obs in observations
        .iter()
        .filter(|o| now.saturating_duration_since(o.timestamp) < horizon)
    {
        total += 1;
        let index = match tallies.iter().position(|t| t.category == obs.category) {
            Some(i) => i,
            None => {
                tallies.push(CategoryTally {
                    category: obs.category,
                    count: 0,
                    male: 0,
                    female: 0,
                });
                tallies.len() - 1
            }
        };
        let tally = &mut tallies[index];
        tally.count += 1;
        match obs.gender {
            Some(Gender::Male) => tally.male += 1,
            Some(Gender::Female) => tally.female += 1,
            None => {}
        }
    }

    if total == 0 {
        return DominantCategory::NONE;
    }

    tallies
        .iter()
        .find(|t| t.count as f64 / total as f64 * 100.0 >= dominance_percent)
        .map(|t| DominantCategory {
            category: Some(t.category),
            gender: if t.male > t.female {
                Some(Gender::Male)
            } else if t.female > t.male {
                Some(Gender::Female)
            } else {
                None
            },
        })
        .unwrap_or(DominantCategory::NONE)
}

/// Rolling window of observations feeding the scene verdict.
///
/// The window is rebuilt by filtering on every [`aggregate`](Self::aggregate)
/// call, so it never holds anything older than the horizon for longer than
/// one batch.
pub struct CategoryAggregator {
    window: Vec<DetectionObservation>,
    horizon: Duration,
    dominance_percent: f64,
}

impl CategoryAggregator {
    pub fn new(horizon: Duration, dominance_percent: f64) -> Self {
        Self {
            window: Vec::new(),
            horizon,
            dominance_percent,
        }
    }

    pub fn record(&mut self, observations: impl IntoIterator<Item = DetectionObservation>) {
        self.window.extend(observations);
    }

    pub fn aggregate(&mut self, now: Instant) -> DominantCategory {
        let horizon = self.horizon;
        self.window
            .retain(|o| now.saturating_duration_since(o.timestamp) < horizon);
        dominant_category(&self.window, now, self.horizon, self.dominance_percent)
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

impl Default for CategoryAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_HORIZON, DEFAULT_DOMINANCE_PERCENT)
    }
}
