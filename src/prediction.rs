//! Fitness-weighted payoff prediction over a match set.

use crate::collection::{RuleArena, RuleSet};
use rand::Rng;

/// Per-action payoff estimates derived from one match set.
///
/// Each entry is the fitness-weighted mean prediction of the match-set
/// members advocating that action; an action with zero fitness behind it
/// predicts zero.
#[derive(Debug, Clone)]
pub struct PredictionArray {
    values: Vec<f64>,
}

impl PredictionArray {
    /// Compute the array for `match_set` over `action_count` actions.
    #[must_use]
    pub fn from_match_set(
        match_set: &RuleSet,
        arena: &RuleArena,
        action_count: usize,
    ) -> Self {
        let mut weighted = vec![0.0; action_count];
        let mut fitness = vec![0.0; action_count];
        for &id in match_set.members() {
            let Some(rule) = arena.get(id) else { continue };
            if rule.action < action_count {
                weighted[rule.action] += rule.prediction * rule.fitness;
                fitness[rule.action] += rule.fitness;
            }
        }
        let values = weighted
            .into_iter()
            .zip(fitness)
            .map(|(w, f)| if f > 0.0 { w / f } else { 0.0 })
            .collect();
        Self { values }
    }

    /// Predicted payoff for one action; `None` if the action is outside
    /// the array.
    #[must_use]
    pub fn value(&self, action: usize) -> Option<f64> {
        self.values.get(action).copied()
    }

    /// All per-action predictions.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The action with the highest prediction.
    ///
    /// The scan starts at a random position and keeps strict improvements,
    /// so ties break uniformly rather than always favoring low indices.
    pub fn best_action<R: Rng>(&self, rng: &mut R) -> usize {
        let n = self.values.len();
        let start = rng.gen_range(0..n);
        let mut best = start;
        for offset in 1..n {
            let action = (start + offset) % n;
            if self.values[action] > self.values[best] {
                best = action;
            }
        }
        best
    }
}
