//! Rule representation and per-rule operations.
//!
//! A rule maps a ternary condition onto an action and carries the learned
//! statistics credit assignment maintains: reward prediction, prediction
//! error, accuracy-based fitness, and the macro-rule bookkeeping fields
//! (numerosity, experience, action-set-size estimate, time stamp).

use crate::error::EngineError;
use crate::params::Params;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One position of a condition: a concrete bit or a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symbol {
    /// Matches '0'.
    Zero,
    /// Matches '1'.
    One,
    /// Matches any symbol.
    DontCare,
}

impl Symbol {
    /// Parse a single condition character.
    ///
    /// # Errors
    ///
    /// Returns an error for characters outside `{'0', '1', '#'}`.
    pub fn from_char(c: char) -> Result<Self, EngineError> {
        match c {
            '0' => Ok(Symbol::Zero),
            '1' => Ok(Symbol::One),
            '#' => Ok(Symbol::DontCare),
            other => Err(EngineError::InvalidSymbol(other)),
        }
    }

    /// The character form of this symbol.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Symbol::Zero => '0',
            Symbol::One => '1',
            Symbol::DontCare => '#',
        }
    }
}

/// A fixed-length string over `{0, 1, #}`.
///
/// Conditions and situations share this representation; situations simply
/// never contain `#` in practice. Two positions agree when they are equal
/// or either side is a don't-care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition(Vec<Symbol>);

impl Condition {
    /// Number of symbol positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the condition has zero positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The symbols of this condition.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.0
    }

    /// A condition of `len` don't-care positions; matches every situation
    /// of that length.
    #[must_use]
    pub fn all_dont_care(len: usize) -> Self {
        Condition(vec![Symbol::DontCare; len])
    }

    /// Generalize a situation into a covering condition: each position is
    /// independently replaced by a don't-care with probability
    /// `dont_care_prob`, otherwise copied.
    pub fn covering<R: Rng>(situation: &Condition, dont_care_prob: f64, rng: &mut R) -> Self {
        let symbols = situation
            .0
            .iter()
            .map(|&s| {
                if rng.gen_bool(dont_care_prob) {
                    Symbol::DontCare
                } else {
                    s
                }
            })
            .collect();
        Condition(symbols)
    }

    /// Whether this condition matches the given situation.
    ///
    /// Every position must be equal or a don't-care on either side.
    /// Differing lengths never match.
    #[must_use]
    pub fn matches(&self, situation: &Condition) -> bool {
        self.0.len() == situation.0.len()
            && self
                .0
                .iter()
                .zip(situation.0.iter())
                .all(|(&c, &s)| c == Symbol::DontCare || s == Symbol::DontCare || c == s)
    }

    /// Whether this condition is strictly more general than `other`:
    /// every concrete position here equals the corresponding position of
    /// `other`, and at least one position is more general here.
    #[must_use]
    pub fn is_more_general(&self, other: &Condition) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        let mut strictly = false;
        for (&a, &b) in self.0.iter().zip(other.0.iter()) {
            if a != Symbol::DontCare && a != b {
                return false;
            }
            if a != b {
                strictly = true;
            }
        }
        strictly
    }
}

impl FromStr for Condition {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars().map(Symbol::from_char).collect::<Result<Vec<_>, _>>().map(Condition)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &s in &self.0 {
            write!(f, "{}", s.as_char())?;
        }
        Ok(())
    }
}

/// A macro-rule: one stored record standing for `numerosity` identical
/// micro-rules.
///
/// Identity (the merge key for insertion) is the (condition, action) pair;
/// everything else is learned statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Ternary condition the situation must match.
    pub condition: Condition,
    /// Action in `[0, action_count)` this rule advocates.
    pub action: usize,
    /// Expected reward.
    pub prediction: f64,
    /// Expected absolute deviation of the reward from the prediction.
    pub prediction_error: f64,
    /// Accuracy-relative fitness share within recent action sets.
    pub fitness: f64,
    /// Reward accumulated since the last credit-assignment pass.
    pub temp_fitness: f64,
    /// Number of identical micro-rules folded into this record.
    pub numerosity: u32,
    /// Number of credit-assignment passes this rule participated in.
    pub experience: u32,
    /// Running estimate of the micro-rule size of action sets this rule
    /// has belonged to.
    pub action_set_size: f64,
    /// Episode index of the last discovery pass applied to this rule.
    pub time_stamp: u64,
}

impl Rule {
    /// Create a covering rule for `situation` with the given action.
    ///
    /// `set_size` seeds the action-set-size estimate (by convention the
    /// match set's numerosity sum plus one) and `episode` the time stamp.
    pub fn covering<R: Rng>(
        situation: &Condition,
        action: usize,
        set_size: f64,
        episode: u64,
        params: &Params,
        rng: &mut R,
    ) -> Self {
        Rule::fresh(
            Condition::covering(situation, params.dont_care_prob, rng),
            action,
            set_size,
            episode,
            params,
        )
    }

    /// Create a rule with the given condition and initial statistics.
    #[must_use]
    pub fn fresh(
        condition: Condition,
        action: usize,
        set_size: f64,
        episode: u64,
        params: &Params,
    ) -> Self {
        Rule {
            condition,
            action,
            prediction: params.prediction_init,
            prediction_error: params.error_init,
            fitness: params.fitness_init,
            temp_fitness: 0.0,
            numerosity: 1,
            experience: 0,
            action_set_size: set_size,
            time_stamp: episode,
        }
    }

    /// Clone this rule as a fresh offspring: numerosity 1, experience 0,
    /// zeroed reward accumulator, and fitness divided by the parent's
    /// numerosity so the clone carries a single micro-rule's share.
    #[must_use]
    pub fn spawn(&self) -> Self {
        Rule {
            condition: self.condition.clone(),
            action: self.action,
            prediction: self.prediction,
            prediction_error: self.prediction_error,
            fitness: self.fitness / f64::from(self.numerosity),
            temp_fitness: 0.0,
            numerosity: 1,
            experience: 0,
            action_set_size: self.action_set_size,
            time_stamp: self.time_stamp,
        }
    }

    /// Whether this rule's condition matches the situation.
    #[must_use]
    pub fn matches(&self, situation: &Condition) -> bool {
        self.condition.matches(situation)
    }

    /// Whether this rule has exactly the given condition and action.
    /// This is identity, not matching: don't-cares are compared literally.
    #[must_use]
    pub fn is_identical(&self, condition: &Condition, action: usize) -> bool {
        self.action == action && self.condition == *condition
    }

    /// Whether this rule is battle-tested and accurate enough to subsume
    /// others.
    #[must_use]
    pub fn is_subsumer(&self, params: &Params) -> bool {
        self.experience > params.subsumption_experience
            && self.prediction_error < params.error_threshold
    }

    /// Whether this rule's condition is strictly more general than the
    /// other rule's.
    #[must_use]
    pub fn is_more_general(&self, other: &Rule) -> bool {
        self.condition.is_more_general(&other.condition)
    }

    /// Whether this rule may absorb `other`: same action, qualified
    /// subsumer, strictly more general.
    #[must_use]
    pub fn subsumes(&self, other: &Rule, params: &Params) -> bool {
        self.action == other.action && self.is_subsumer(params) && self.is_more_general(other)
    }

    /// Accuracy derived from the prediction error: 1 below the error
    /// threshold, otherwise a steep power-law decay.
    #[must_use]
    pub fn accuracy(&self, params: &Params) -> f64 {
        if self.prediction_error <= params.error_threshold {
            1.0
        } else {
            params.accuracy_falloff
                * (self.prediction_error / params.error_threshold)
                    .powf(-params.accuracy_exponent)
        }
    }

    /// Deletion-vote weight for roulette-wheel deletion.
    ///
    /// Inexperienced rules and rules at or above the `δ` fraction of the
    /// mean fitness vote only with their action-set footprint; experienced
    /// low-fitness rules vote proportionally more.
    #[must_use]
    pub fn deletion_vote(&self, mean_fitness: f64, params: &Params) -> f64 {
        let micro_fitness = self.fitness / f64::from(self.numerosity);
        let base = self.action_set_size * f64::from(self.numerosity);
        if micro_fitness >= params.deletion_fitness_fraction * mean_fitness
            || self.experience < params.deletion_experience
        {
            base
        } else {
            base * mean_fitness / micro_fitness
        }
    }

    /// Niche mutation: each condition position flips between don't-care
    /// and a concrete bit with probability `mutation_prob`; the action
    /// moves to a different uniformly-chosen action with the same
    /// probability. Returns whether anything changed.
    pub fn mutate<R: Rng>(&mut self, action_count: usize, params: &Params, rng: &mut R) -> bool {
        let mut changed = false;
        let symbols: Vec<Symbol> = self
            .condition
            .symbols()
            .iter()
            .map(|&s| {
                if rng.gen_bool(params.mutation_prob) {
                    changed = true;
                    match s {
                        Symbol::DontCare => {
                            if rng.gen_bool(0.5) {
                                Symbol::Zero
                            } else {
                                Symbol::One
                            }
                        }
                        _ => Symbol::DontCare,
                    }
                } else {
                    s
                }
            })
            .collect();
        self.condition = Condition(symbols);

        if action_count > 1 && rng.gen_bool(params.mutation_prob) {
            let mut action = rng.gen_range(0..action_count);
            while action == self.action {
                action = rng.gen_range(0..action_count);
            }
            self.action = action;
            changed = true;
        }
        changed
    }

    /// Two-point crossover: swap a random interval of condition symbols
    /// between the two rules. Cut points are reordered if inverted and
    /// bumped apart if equal. Returns whether any swapped symbol differed.
    pub fn two_point_crossover<R: Rng>(&mut self, other: &mut Rule, rng: &mut R) -> bool {
        let len = self.condition.len();
        debug_assert_eq!(len, other.condition.len());

        let mut lo = rng.gen_range(0..len);
        let mut hi = rng.gen_range(0..len) + 1;
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        } else if lo == hi {
            hi += 1;
        }
        let hi = hi.min(len);

        let mut changed = false;
        for i in lo..hi {
            if self.condition.0[i] != other.condition.0[i] {
                changed = true;
                std::mem::swap(&mut self.condition.0[i], &mut other.condition.0[i]);
            }
        }
        changed
    }

    /// Increment experience; called once per credit-assignment pass.
    pub fn increase_experience(&mut self) {
        self.experience += 1;
    }

    /// Update the prediction error toward `|reward - prediction|`.
    ///
    /// Below `1/β` experience this is a plain incremental average so the
    /// first observations are not over-weighted; afterwards an
    /// exponential moving average. Must run before `update_prediction`
    /// so the deviation is measured against the old prediction.
    pub fn update_error(&mut self, reward: f64, params: &Params) {
        let deviation = (reward - self.prediction).abs();
        let experience = f64::from(self.experience);
        if experience < 1.0 / params.learning_rate {
            self.prediction_error =
                (self.prediction_error * (experience - 1.0) + deviation) / experience;
        } else {
            self.prediction_error += params.learning_rate * (deviation - self.prediction_error);
        }
    }

    /// Update the reward prediction toward `reward` (incremental average
    /// below `1/β` experience, EMA after).
    pub fn update_prediction(&mut self, reward: f64, params: &Params) {
        let experience = f64::from(self.experience);
        if experience < 1.0 / params.learning_rate {
            self.prediction = (self.prediction * (experience - 1.0) + reward) / experience;
        } else {
            self.prediction += params.learning_rate * (reward - self.prediction);
        }
    }

    /// Update the action-set-size estimate toward the current action
    /// set's numerosity sum (same schedule as the prediction update).
    pub fn update_action_set_size(&mut self, set_numerosity: f64, params: &Params) {
        let experience = f64::from(self.experience);
        if experience < 1.0 / params.learning_rate {
            self.action_set_size =
                (self.action_set_size * (experience - 1.0) + set_numerosity) / experience;
        } else {
            self.action_set_size +=
                params.learning_rate * (set_numerosity - self.action_set_size);
        }
    }

    /// Move fitness toward this rule's share of the action set's total
    /// accuracy (`accuracy × numerosity / accuracy_sum`).
    pub fn update_fitness(&mut self, accuracy_sum: f64, accuracy: f64, params: &Params) {
        self.fitness += params.learning_rate
            * (accuracy * f64::from(self.numerosity) / accuracy_sum - self.fitness);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn rule(condition: &str, action: usize) -> Rule {
        Rule::fresh(
            condition.parse().unwrap(),
            action,
            1.0,
            0,
            &Params::default(),
        )
    }

    #[test]
    fn test_matching() {
        let r = rule("01#1", 0);
        assert!(r.matches(&"0101".parse().unwrap()));
        assert!(r.matches(&"0111".parse().unwrap()));
        assert!(!r.matches(&"1101".parse().unwrap()));
        // Don't-care on the situation side also matches.
        assert!(r.matches(&"#1#1".parse().unwrap()));
        // Length mismatch never matches.
        assert!(!r.matches(&"010".parse().unwrap()));
    }

    #[test]
    fn test_all_dont_care_matches_everything() {
        let r = Rule::fresh(Condition::all_dont_care(4), 0, 1.0, 0, &Params::default());
        for situation in ["0000", "1111", "0101", "1010"] {
            assert!(r.matches(&situation.parse().unwrap()));
        }
    }

    #[test]
    fn test_invalid_symbol() {
        let err = "01x1".parse::<Condition>().unwrap_err();
        assert_eq!(err, EngineError::InvalidSymbol('x'));
    }

    #[test]
    fn test_more_general_is_strict() {
        let general: Condition = "0##1".parse().unwrap();
        let specific: Condition = "0011".parse().unwrap();
        assert!(general.is_more_general(&specific));
        assert!(!specific.is_more_general(&general));
        // Equal conditions are not strictly more general.
        assert!(!general.is_more_general(&general));
        // Concrete disagreement breaks generality.
        let other: Condition = "1011".parse().unwrap();
        assert!(!general.is_more_general(&other));
    }

    #[test]
    fn test_identity_is_literal() {
        let r = rule("01#1", 3);
        assert!(r.is_identical(&"01#1".parse().unwrap(), 3));
        assert!(!r.is_identical(&"0101".parse().unwrap(), 3));
        assert!(!r.is_identical(&"01#1".parse().unwrap(), 2));
    }

    #[test]
    fn test_accuracy_threshold() {
        let params = Params::default();
        let mut r = rule("0101", 0);
        r.prediction_error = params.error_threshold;
        assert!((r.accuracy(&params) - 1.0).abs() < f64::EPSILON);

        r.prediction_error = params.error_threshold * 2.0;
        let expected = params.accuracy_falloff * 2.0_f64.powf(-params.accuracy_exponent);
        assert!((r.accuracy(&params) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_deletion_vote_protects_inexperienced() {
        let params = Params::default();
        let mut r = rule("0101", 0);
        r.action_set_size = 10.0;
        r.fitness = 1e-6; // far below the mean
        r.experience = 0;
        // Inexperienced: plain footprint vote despite terrible fitness.
        assert!((r.deletion_vote(1.0, &params) - 10.0).abs() < 1e-12);

        r.experience = params.deletion_experience;
        // Experienced and unfit: vote is amplified.
        assert!(r.deletion_vote(1.0, &params) > 10.0);
    }

    #[test]
    fn test_mutation_stays_in_alphabet() {
        let params = Params {
            mutation_prob: 1.0,
            ..Params::default()
        };
        let mut rng = SmallRng::seed_from_u64(9);
        let mut r = rule("01#1#", 0);
        let changed = r.mutate(4, &params, &mut rng);
        assert!(changed);
        // Every position flipped between concrete and don't-care.
        let flipped: Condition = r.condition.clone();
        for (&new, &old) in flipped
            .symbols()
            .iter()
            .zip("01#1#".parse::<Condition>().unwrap().symbols())
        {
            match old {
                Symbol::DontCare => assert_ne!(new, Symbol::DontCare),
                _ => assert_eq!(new, Symbol::DontCare),
            }
        }
        assert_ne!(r.action, 0);
    }

    #[test]
    fn test_mutation_single_action_never_loops() {
        let params = Params {
            mutation_prob: 1.0,
            ..Params::default()
        };
        let mut rng = SmallRng::seed_from_u64(11);
        let mut r = rule("0101", 0);
        r.mutate(1, &params, &mut rng);
        assert_eq!(r.action, 0);
    }

    #[test]
    fn test_crossover_preserves_position_multisets() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut a = rule("0000000", 0);
        let mut b = rule("1111111", 1);

        let changed = a.two_point_crossover(&mut b, &mut rng);
        assert!(changed);

        // Swapping an interval keeps, per position, the pair of symbols.
        for i in 0..7 {
            let pair = [a.condition.symbols()[i], b.condition.symbols()[i]];
            assert!(pair.contains(&Symbol::Zero));
            assert!(pair.contains(&Symbol::One));
        }
        // Something actually moved.
        assert!(a.condition.symbols().contains(&Symbol::One));
    }

    #[test]
    fn test_crossover_identical_reports_unchanged() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut a = rule("0101010", 0);
        let mut b = rule("0101010", 1);
        assert!(!a.two_point_crossover(&mut b, &mut rng));
    }

    #[test]
    fn test_update_schedule_incremental_then_ema() {
        let params = Params {
            learning_rate: 0.5, // 1/β = 2
            ..Params::default()
        };
        let mut r = rule("0101", 0);
        r.prediction = 10.0;

        // First pass: plain average over one observation.
        r.increase_experience();
        r.update_error(4.0, &params);
        r.update_prediction(4.0, &params);
        assert!((r.prediction - 4.0).abs() < 1e-12);
        assert!((r.prediction_error - 6.0).abs() < 1e-12);

        // Experience 2 reaches 1/β: EMA from here on.
        r.increase_experience();
        r.update_prediction(8.0, &params);
        assert!((r.prediction - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_spawn_divides_fitness() {
        let mut parent = rule("01#1", 2);
        parent.numerosity = 4;
        parent.fitness = 0.8;
        parent.experience = 12;
        parent.temp_fitness = 3.0;

        let child = parent.spawn();
        assert_eq!(child.numerosity, 1);
        assert_eq!(child.experience, 0);
        assert!((child.fitness - 0.2).abs() < 1e-12);
        assert!((child.temp_fitness - 0.0).abs() < f64::EPSILON);
        assert_eq!(child.condition, parent.condition);
    }

    #[test]
    fn test_condition_display_roundtrip() {
        let c: Condition = "01#10##".parse().unwrap();
        assert_eq!(c.to_string(), "01#10##");
    }
}
