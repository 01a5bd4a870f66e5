//! The decision-cycle state machine around one long-lived population.
//!
//! An [`Engine`] owns the rule arena, the population and a seeded
//! pseudo-random stream, and walks through one cycle per external
//! decision: `Idle` → [`Engine::decide`] → `MatchBuilt` →
//! [`Engine::open_action_set`] → `ActionSetOpen` → any number of
//! [`Engine::credit_reward`] calls → [`Engine::end_episode`] → `Idle`.
//!
//! Independent decision-makers each own a private `Engine` with its own
//! seed; instances share no state and may run on parallel threads.

use crate::collection::{self, RuleArena, RuleId, RuleSet};
use crate::error::{EngineError, Phase};
use crate::params::Params;
use crate::prediction::PredictionArray;
use crate::rule::{Condition, Rule};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// Result of one [`Engine::decide`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// The chosen action.
    pub action: usize,
    /// Handle of a match-set rule advocating the chosen action, usable
    /// for [`Engine::credit_reward`] until the next [`Engine::end_episode`].
    pub rule: RuleId,
}

/// Flat diagnostic export of one population macro-rule.
///
/// Diagnostic only; the live population remains the source of truth
/// during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Condition rendered over `{'0', '1', '#'}`.
    pub condition: String,
    /// Advocated action.
    pub action: usize,
    /// Expected reward.
    pub prediction: f64,
    /// Expected absolute deviation of the reward.
    pub prediction_error: f64,
    /// Relative-accuracy share of the rule's action sets.
    pub fitness: f64,
    /// Micro-rules folded into this record.
    pub numerosity: u32,
    /// Credit-assignment passes participated in.
    pub experience: u32,
    /// Running action-set size estimate.
    pub action_set_size: f64,
    /// Episode of the last discovery pass.
    pub time_stamp: u64,
}

/// An adaptive rule engine: one population, one decision cycle at a time.
#[derive(Debug)]
pub struct Engine {
    params: Params,
    arena: RuleArena,
    population: RuleSet,
    rng: SmallRng,
    phase: Phase,
    episode: u64,
    condition_length: Option<usize>,
    action_count: usize,
    match_set: RuleSet,
    action_set: RuleSet,
}

impl Engine {
    /// Create an engine with an empty population, seeded from `params`.
    #[must_use]
    pub fn new(params: Params) -> Self {
        Engine {
            rng: SmallRng::seed_from_u64(params.seed),
            params,
            arena: RuleArena::new(),
            population: RuleSet::new(),
            phase: Phase::Idle,
            episode: 0,
            condition_length: None,
            action_count: 0,
            match_set: RuleSet::new(),
            action_set: RuleSet::new(),
        }
    }

    /// Episodes completed so far.
    #[must_use]
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Number of macro-rules in the population.
    #[must_use]
    pub fn population_size(&self) -> usize {
        self.population.len()
    }

    /// Total micro-rule count of the population.
    #[must_use]
    pub fn population_numerosity(&self) -> u32 {
        self.population.numerosity_sum()
    }

    fn ensure_phase(&self, expected: Phase) -> Result<(), EngineError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(EngineError::WrongPhase {
                expected,
                found: self.phase,
            })
        }
    }

    /// Choose an action for `situation`.
    ///
    /// Builds the match set (covering any unrepresented action, which may
    /// mutate the population), computes the per-action prediction array
    /// and picks the best action with a random tie-break. The returned
    /// rule handle names the fittest match-set advocate of that action.
    ///
    /// The condition length is fixed by the first call; `action_count`
    /// must be positive, stable across calls, and no larger than the
    /// population cap.
    pub fn decide(
        &mut self,
        situation: &str,
        action_count: usize,
    ) -> Result<Decision, EngineError> {
        self.ensure_phase(Phase::Idle)?;
        if action_count == 0 {
            return Err(EngineError::ActionOutOfRange {
                action: 0,
                action_count,
            });
        }
        if self.action_count != 0 && action_count != self.action_count {
            return Err(EngineError::ActionCountChanged {
                expected: self.action_count,
                got: action_count,
            });
        }
        if u64::from(self.params.max_population) < action_count as u64 {
            return Err(EngineError::CapTooSmall {
                max_population: self.params.max_population,
                action_count,
            });
        }
        let situation: Condition = situation.parse()?;
        let expected = *self.condition_length.get_or_insert(situation.len());
        if situation.len() != expected {
            return Err(EngineError::SituationLength {
                expected,
                got: situation.len(),
            });
        }

        self.match_set = collection::build_match_set(
            &mut self.population,
            &mut self.arena,
            &situation,
            action_count,
            self.episode,
            &self.params,
            &mut self.rng,
        );
        let array = PredictionArray::from_match_set(&self.match_set, &self.arena, action_count);
        let action = array.best_action(&mut self.rng);

        // Covering guarantees at least one advocate per action; hand back
        // the fittest one.
        let rule = self
            .match_set
            .members()
            .iter()
            .copied()
            .filter(|&id| self.arena.get(id).is_some_and(|r| r.action == action))
            .max_by(|&a, &b| {
                let fa = self.arena.get(a).map_or(0.0, |r| r.fitness);
                let fb = self.arena.get(b).map_or(0.0, |r| r.fitness);
                fa.total_cmp(&fb)
            })
            .ok_or(EngineError::CapTooSmall {
                max_population: self.params.max_population,
                action_count,
            })?;

        self.action_count = action_count;
        self.phase = Phase::MatchBuilt;
        Ok(Decision { action, rule })
    }

    /// Open the action set for `action`.
    ///
    /// Collects the match-set rules advocating `action`. If none do
    /// (possible only when the caller picks an action other than the one
    /// returned by [`Engine::decide`] after intervening deletions), a
    /// maximally general rule for that action is synthesized so the
    /// action set is never empty; it joins the population when the
    /// episode ends.
    pub fn open_action_set(&mut self, action: usize) -> Result<(), EngineError> {
        self.ensure_phase(Phase::MatchBuilt)?;
        if action >= self.action_count {
            return Err(EngineError::ActionOutOfRange {
                action,
                action_count: self.action_count,
            });
        }

        let mut action_set = RuleSet::new();
        let advocates: Vec<RuleId> = self
            .match_set
            .members()
            .iter()
            .copied()
            .filter(|&id| self.arena.get(id).is_some_and(|r| r.action == action))
            .collect();
        for id in advocates {
            action_set.link(&self.arena, id);
        }
        if action_set.is_empty() {
            let length = self.condition_length.unwrap_or_default();
            let rule = Rule::fresh(
                Condition::all_dont_care(length),
                action,
                f64::from(self.match_set.numerosity_sum() + 1),
                self.episode,
                &self.params,
            );
            let id = self.arena.alloc(rule);
            action_set.link(&self.arena, id);
        }

        self.action_set = action_set;
        self.phase = Phase::ActionSetOpen;
        Ok(())
    }

    /// Add `amount` to an action-set rule's reward accumulator.
    ///
    /// Callable any number of times while the action set is open; the
    /// accumulated total is folded into the rule's statistics at
    /// [`Engine::end_episode`]. Returns whether the credit landed; a
    /// handle no longer in the action set is reported as `false`, not an
    /// error, since the rule may simply have been pruned.
    pub fn credit_reward(&mut self, rule: RuleId, amount: f64) -> Result<bool, EngineError> {
        self.ensure_phase(Phase::ActionSetOpen)?;
        if !self.action_set.contains(rule) {
            return Ok(false);
        }
        match self.arena.get_mut(rule) {
            Some(r) => {
                r.temp_fitness += amount;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close the episode: finalize the action set and run discovery.
    ///
    /// For every action-set rule the accumulated reward is folded into its
    /// error, prediction and action-set-size estimate and fitness is
    /// recomputed from relative accuracy. Action-set subsumption runs if
    /// configured, the set is folded into the population (merging by
    /// identity), the population is trimmed to its cap, and the genetic
    /// discovery pass runs when the generation gap warrants it.
    ///
    /// All rule handles from this cycle are invalid afterwards.
    pub fn end_episode(&mut self) -> Result<(), EngineError> {
        self.ensure_phase(Phase::ActionSetOpen)?;
        let mut action_set = std::mem::take(&mut self.action_set);
        self.match_set = RuleSet::new();
        self.episode += 1;

        action_set.reinforce(&mut self.arena, &self.params);
        if self.params.action_set_subsumption {
            action_set.run_subsumption(&mut self.population, &mut self.arena, &self.params);
        }
        action_set.fold_into(&mut self.population, &mut self.arena);
        while self.population.numerosity_sum() > self.params.max_population {
            let Some(deleted) =
                self.population
                    .delete_roulette(&mut self.arena, &self.params, &mut self.rng)
            else {
                break;
            };
            action_set.sync_deletion(deleted);
        }
        action_set.run_discovery(
            &mut self.population,
            &mut self.arena,
            self.episode,
            self.action_count,
            &self.params,
            &mut self.rng,
        );

        self.phase = Phase::Idle;
        Ok(())
    }

    /// Export every population macro-rule as a flat record, in no
    /// particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RuleRecord> {
        self.population
            .members()
            .iter()
            .filter_map(|&id| self.arena.get(id))
            .map(|rule| RuleRecord {
                condition: rule.condition.to_string(),
                action: rule.action,
                prediction: rule.prediction,
                prediction_error: rule.prediction_error,
                fitness: rule.fitness,
                numerosity: rule.numerosity,
                experience: rule.experience,
                action_set_size: rule.action_set_size,
                time_stamp: rule.time_stamp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params::default()
    }

    #[test]
    fn test_decide_covers_empty_population() {
        let mut engine = Engine::new(params());
        let decision = engine.decide("0101", 2).unwrap();
        assert!(decision.action < 2);
        // One covering rule per action.
        assert_eq!(engine.population_size(), 2);
        assert_eq!(engine.population_numerosity(), 2);
    }

    #[test]
    fn test_phase_violations() {
        let mut engine = Engine::new(params());

        // Idle: only decide is legal.
        assert!(matches!(
            engine.open_action_set(0),
            Err(EngineError::WrongPhase { .. })
        ));
        assert!(matches!(
            engine.end_episode(),
            Err(EngineError::WrongPhase { .. })
        ));

        let decision = engine.decide("0101", 2).unwrap();
        assert!(matches!(
            engine.decide("0101", 2),
            Err(EngineError::WrongPhase { .. })
        ));
        assert!(matches!(
            engine.credit_reward(decision.rule, 1.0),
            Err(EngineError::WrongPhase { .. })
        ));

        engine.open_action_set(decision.action).unwrap();
        engine.end_episode().unwrap();

        // A second end_episode without an intervening cycle is rejected.
        assert!(matches!(
            engine.end_episode(),
            Err(EngineError::WrongPhase { .. })
        ));
    }

    #[test]
    fn test_situation_validation() {
        let mut engine = Engine::new(params());
        assert!(matches!(
            engine.decide("01x1", 2),
            Err(EngineError::InvalidSymbol('x'))
        ));

        engine.decide("0101", 2).unwrap();
        engine.open_action_set(0).unwrap();
        engine.end_episode().unwrap();

        // Length is fixed by the first successful decision.
        assert_eq!(
            engine.decide("010111", 2),
            Err(EngineError::SituationLength {
                expected: 4,
                got: 6
            })
        );
    }

    #[test]
    fn test_cap_too_small_rejected() {
        let mut engine = Engine::new(Params {
            max_population: 3,
            ..params()
        });
        assert!(matches!(
            engine.decide("0101", 4),
            Err(EngineError::CapTooSmall { .. })
        ));
    }

    #[test]
    fn test_action_count_fixed_by_first_decision() {
        let mut engine = Engine::new(params());
        engine.decide("0101", 2).unwrap();
        engine.open_action_set(0).unwrap();
        engine.end_episode().unwrap();

        assert_eq!(
            engine.decide("0101", 3),
            Err(EngineError::ActionCountChanged { expected: 2, got: 3 })
        );
        // The established count still works.
        engine.decide("0101", 2).unwrap();
    }

    #[test]
    fn test_action_out_of_range() {
        let mut engine = Engine::new(params());
        engine.decide("0101", 2).unwrap();
        assert_eq!(
            engine.open_action_set(2),
            Err(EngineError::ActionOutOfRange {
                action: 2,
                action_count: 2
            })
        );
    }

    #[test]
    fn test_credit_lands_on_action_set_member() {
        let mut engine = Engine::new(params());
        let decision = engine.decide("0101", 2).unwrap();
        engine.open_action_set(decision.action).unwrap();

        assert!(engine.credit_reward(decision.rule, 5.0).unwrap());
        // A handle advocating the other action is reported, not erred.
        let other = engine
            .population
            .members()
            .iter()
            .copied()
            .find(|&id| engine.arena.get(id).unwrap().action != decision.action)
            .unwrap();
        assert!(!engine.credit_reward(other, 5.0).unwrap());
    }

    #[test]
    fn test_first_reinforcement_is_plain_average() {
        let mut engine = Engine::new(params());
        let decision = engine.decide("0101", 2).unwrap();
        engine.open_action_set(decision.action).unwrap();
        engine.credit_reward(decision.rule, 5.0).unwrap();
        engine.end_episode().unwrap();

        let p = engine.params;
        let record = engine
            .snapshot()
            .into_iter()
            .find(|r| r.action == decision.action)
            .unwrap();
        assert_eq!(record.experience, 1);
        assert!((record.prediction - 5.0).abs() < 1e-12);
        assert!((record.prediction_error - (p.prediction_init - 5.0).abs()).abs() < 1e-12);
        assert!(record.fitness > p.fitness_init);

        // The other action's rule took no part in the episode.
        let other = engine
            .snapshot()
            .into_iter()
            .find(|r| r.action != decision.action)
            .unwrap();
        assert_eq!(other.experience, 0);
        assert!((other.prediction - p.prediction_init).abs() < f64::EPSILON);
    }

    #[test]
    fn test_episode_counter_advances() {
        let mut engine = Engine::new(params());
        assert_eq!(engine.episode(), 0);
        for i in 1..=3 {
            let decision = engine.decide("0101", 2).unwrap();
            engine.open_action_set(decision.action).unwrap();
            engine.end_episode().unwrap();
            assert_eq!(engine.episode(), i);
        }
    }

    #[test]
    fn test_open_other_action_still_has_advocates() {
        // Covering represents every action, so opening an action other
        // than the decided one still yields a non-empty set.
        let mut engine = Engine::new(params());
        let decision = engine.decide("0101", 2).unwrap();
        let other = 1 - decision.action;
        engine.open_action_set(other).unwrap();
        assert!(!engine.action_set.is_empty());
        engine.end_episode().unwrap();
    }

    #[test]
    fn test_population_stays_under_cap() {
        let cap = 20;
        let mut engine = Engine::new(Params {
            max_population: cap,
            seed: 7,
            ..params()
        });
        for i in 0..200u32 {
            let situation = format!("{:04b}", i % 16);
            let decision = engine.decide(&situation, 4).unwrap();
            engine.open_action_set(decision.action).unwrap();
            engine.credit_reward(decision.rule, f64::from(i % 10)).unwrap();
            engine.end_episode().unwrap();
            assert!(engine.population_numerosity() <= cap);
        }
    }

    #[test]
    fn test_snapshot_roundtrips_through_json() {
        let mut engine = Engine::new(params());
        let decision = engine.decide("0101", 2).unwrap();
        engine.open_action_set(decision.action).unwrap();
        engine.credit_reward(decision.rule, 2.5).unwrap();
        engine.end_episode().unwrap();

        let records = engine.snapshot();
        let json = serde_json::to_string(&records).unwrap();
        let back: Vec<RuleRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(records, back);
    }
}
