//! Rule collections: the arena, the population, match sets and action sets.
//!
//! Every rule lives exactly once in a [`RuleArena`]; the population, match
//! set and action set are [`RuleSet`]s holding handles into the arena plus
//! a cached numerosity sum. Sharing one authoritative record per rule keeps
//! the statistics of a rule consistent across all sets that reference it.
//!
//! This module owns the set-level algorithms: match-set construction with
//! the covering/deletion fixed-point loop, roulette-wheel deletion,
//! credit-assignment reinforcement, action-set subsumption, and the
//! genetic discovery pass.

use crate::params::Params;
use crate::rule::{Condition, Rule};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Stable handle to a rule in a [`RuleArena`].
///
/// Handles are opaque to callers and valid only while the rule is alive;
/// the engine invalidates outstanding handles at every episode boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(usize);

/// Slab of rules with a free list.
///
/// The arena is the single owner of all rule records. Sets reference rules
/// by [`RuleId`]; removing a rule frees its slot for reuse.
#[derive(Debug, Default)]
pub struct RuleArena {
    slots: Vec<Option<Rule>>,
    free: Vec<usize>,
}

impl RuleArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a rule and return its handle.
    pub fn alloc(&mut self, rule: Rule) -> RuleId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(rule);
            RuleId(slot)
        } else {
            self.slots.push(Some(rule));
            RuleId(self.slots.len() - 1)
        }
    }

    /// Look up a rule; `None` if it has been removed.
    #[must_use]
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable lookup; `None` if the rule has been removed.
    pub fn get_mut(&mut self, id: RuleId) -> Option<&mut Rule> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Remove a rule and free its slot.
    pub fn remove(&mut self, id: RuleId) -> Option<Rule> {
        let rule = self.slots.get_mut(id.0).and_then(Option::take);
        if rule.is_some() {
            self.free.push(id.0);
        }
        rule
    }

    /// Number of live rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether the arena holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one roulette-wheel deletion step.
#[derive(Debug, Clone, Copy)]
pub struct DeletedRule {
    /// The rule whose numerosity was decremented.
    pub id: RuleId,
    /// The rule's action, for re-checking match-set coverage.
    pub action: usize,
    /// Whether the rule's numerosity reached zero and it was removed.
    pub removed: bool,
}

/// An unordered collection of distinct rules, identified by handle.
///
/// One structure serves all three roles: the long-lived population (bounded
/// by the numerosity cap), the per-decision match set, and the per-episode
/// action set. `numerosity_sum` caches the total micro-rule count of the
/// members and is maintained incrementally by every operation.
#[derive(Debug, Default)]
pub struct RuleSet {
    members: Vec<RuleId>,
    numerosity_sum: u32,
}

impl RuleSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles of the member rules, in no particular order.
    #[must_use]
    pub fn members(&self) -> &[RuleId] {
        &self.members
    }

    /// Number of macro-rules in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Total micro-rule count of the members.
    #[must_use]
    pub fn numerosity_sum(&self) -> u32 {
        self.numerosity_sum
    }

    /// Whether the set contains the given rule.
    #[must_use]
    pub fn contains(&self, id: RuleId) -> bool {
        self.members.contains(&id)
    }

    /// Add an existing arena rule as a member, counting its current
    /// numerosity into the cached sum.
    pub fn link(&mut self, arena: &RuleArena, id: RuleId) {
        debug_assert!(!self.contains(id));
        if let Some(rule) = arena.get(id) {
            self.members.push(id);
            self.numerosity_sum += rule.numerosity;
        }
    }

    /// Drop a member without touching the cached sum; callers adjust the
    /// sum according to what happened to the rule's numerosity.
    fn remove_member(&mut self, id: RuleId) -> bool {
        if let Some(pos) = self.members.iter().position(|&m| m == id) {
            self.members.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Mirror a population deletion in this set: drop one from the cached
    /// sum and unlink the member if the rule was removed entirely. No-op
    /// when the deleted rule is not a member.
    pub fn sync_deletion(&mut self, deleted: DeletedRule) {
        if !self.contains(deleted.id) {
            return;
        }
        self.numerosity_sum -= 1;
        if deleted.removed {
            self.remove_member(deleted.id);
        }
    }

    /// Insert a new rule, merging by identity: if a member with the same
    /// (condition, action) exists, its numerosity absorbs the incoming
    /// rule's; otherwise the rule is stored in the arena and linked.
    ///
    /// Returns the handle of the surviving record and whether a merge
    /// happened. The cached sum always grows by the incoming numerosity.
    pub fn insert(&mut self, arena: &mut RuleArena, rule: Rule) -> (RuleId, bool) {
        let incoming = rule.numerosity;
        if let Some(id) = self.find_identical(arena, &rule.condition, rule.action) {
            if let Some(existing) = arena.get_mut(id) {
                existing.numerosity += incoming;
            }
            self.numerosity_sum += incoming;
            (id, true)
        } else {
            let id = arena.alloc(rule);
            self.members.push(id);
            self.numerosity_sum += incoming;
            (id, false)
        }
    }

    /// Find a member with exactly the given condition and action.
    #[must_use]
    pub fn find_identical(
        &self,
        arena: &RuleArena,
        condition: &Condition,
        action: usize,
    ) -> Option<RuleId> {
        self.members
            .iter()
            .copied()
            .find(|&id| arena.get(id).is_some_and(|r| r.is_identical(condition, action)))
    }

    /// Whether some member advocates the given action.
    #[must_use]
    pub fn is_action_covered(&self, arena: &RuleArena, action: usize) -> bool {
        self.members
            .iter()
            .any(|&id| arena.get(id).is_some_and(|r| r.action == action))
    }

    /// Sum of member fitness values.
    #[must_use]
    pub fn fitness_sum(&self, arena: &RuleArena) -> f64 {
        self.members
            .iter()
            .filter_map(|&id| arena.get(id))
            .map(|r| r.fitness)
            .sum()
    }

    /// Numerosity-weighted mean time stamp of the members.
    #[must_use]
    pub fn mean_time_stamp(&self, arena: &RuleArena) -> f64 {
        if self.numerosity_sum == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .members
            .iter()
            .filter_map(|&id| arena.get(id))
            .map(|r| r.time_stamp as f64 * f64::from(r.numerosity))
            .sum();
        sum / f64::from(self.numerosity_sum)
    }

    /// Remove one micro-rule by roulette-wheel deletion (population role).
    ///
    /// Votes weight each rule by its action-set footprint, amplified for
    /// experienced low-fitness rules. The selected macro-rule loses one
    /// numerosity and is removed entirely (and freed from the arena) when
    /// it reaches zero. Returns `None` on an empty set.
    pub fn delete_roulette<R: Rng>(
        &mut self,
        arena: &mut RuleArena,
        params: &Params,
        rng: &mut R,
    ) -> Option<DeletedRule> {
        if self.members.is_empty() {
            return None;
        }
        let mean_fitness = self.fitness_sum(arena) / f64::from(self.numerosity_sum);
        let total_vote: f64 = self
            .members
            .iter()
            .filter_map(|&id| arena.get(id))
            .map(|r| r.deletion_vote(mean_fitness, params))
            .sum();

        let choice = rng.gen_range(0.0..1.0) * total_vote;
        let mut acc = 0.0;
        let mut selected = None;
        for &id in &self.members {
            let Some(rule) = arena.get(id) else { continue };
            acc += rule.deletion_vote(mean_fitness, params);
            if acc > choice {
                selected = Some((id, rule.action));
                break;
            }
        }
        let (id, action) = selected?;

        let rule = arena.get_mut(id)?;
        rule.numerosity -= 1;
        let removed = rule.numerosity == 0;
        self.numerosity_sum -= 1;
        if removed {
            self.remove_member(id);
            arena.remove(id);
        }
        Some(DeletedRule { id, action, removed })
    }

    /// Select one member by fitness-proportional roulette.
    #[must_use]
    pub fn select_roulette<R: Rng>(
        &self,
        arena: &RuleArena,
        fitness_sum: f64,
        rng: &mut R,
    ) -> Option<RuleId> {
        let choice = rng.gen_range(0.0..1.0) * fitness_sum;
        let mut acc = 0.0;
        for &id in &self.members {
            acc += arena.get(id).map_or(0.0, |r| r.fitness);
            if acc > choice {
                return Some(id);
            }
        }
        self.members.last().copied()
    }

    /// Credit-assignment pass over an action set.
    ///
    /// For every member, in order: bump experience, fold the accumulated
    /// reward into the prediction error (against the old prediction), then
    /// the prediction, then the action-set-size estimate, and reset the
    /// accumulator. Afterwards fitness is recomputed across the whole set
    /// from relative accuracy.
    pub fn reinforce(&mut self, arena: &mut RuleArena, params: &Params) {
        let set_numerosity = f64::from(self.numerosity_sum);
        for &id in &self.members {
            let Some(rule) = arena.get_mut(id) else { continue };
            let reward = rule.temp_fitness;
            rule.increase_experience();
            rule.update_error(reward, params);
            rule.update_prediction(reward, params);
            rule.update_action_set_size(set_numerosity, params);
            rule.temp_fitness = 0.0;
        }
        self.update_fitness_set(arena, params);
    }

    /// Recompute fitness for every member from its share of the set's
    /// numerosity-weighted accuracy sum.
    fn update_fitness_set(&mut self, arena: &mut RuleArena, params: &Params) {
        let accuracies: Vec<(RuleId, f64)> = self
            .members
            .iter()
            .filter_map(|&id| arena.get(id).map(|r| (id, r.accuracy(params))))
            .collect();
        let accuracy_sum: f64 = accuracies
            .iter()
            .map(|&(id, acc)| acc * arena.get(id).map_or(0.0, |r| f64::from(r.numerosity)))
            .sum();
        if accuracy_sum <= 0.0 {
            return;
        }
        for (id, accuracy) in accuracies {
            if let Some(rule) = arena.get_mut(id) {
                rule.update_fitness(accuracy_sum, accuracy, params);
            }
        }
    }

    /// Action-set subsumption: find the most general qualified subsumer
    /// (first found wins ties) and merge every member it strictly
    /// generalizes into it.
    ///
    /// Merged rules are removed from this set, the population and the
    /// arena; their numerosity transfers to the subsumer, so no set's
    /// numerosity sum changes.
    pub fn run_subsumption(
        &mut self,
        population: &mut RuleSet,
        arena: &mut RuleArena,
        params: &Params,
    ) {
        let mut subsumer: Option<RuleId> = None;
        for &id in &self.members {
            let Some(rule) = arena.get(id) else { continue };
            if !rule.is_subsumer(params) {
                continue;
            }
            match subsumer.and_then(|s| arena.get(s)) {
                Some(current) if !rule.is_more_general(current) => {}
                _ => subsumer = Some(id),
            }
        }
        let Some(subsumer_id) = subsumer else { return };

        let victims: Vec<RuleId> = self
            .members
            .iter()
            .copied()
            .filter(|&id| {
                id != subsumer_id
                    && matches!(
                        (arena.get(subsumer_id), arena.get(id)),
                        (Some(s), Some(v)) if s.is_more_general(v)
                    )
            })
            .collect();

        let subsumer_in_population = population.contains(subsumer_id);
        for victim_id in victims {
            let Some(victim) = arena.remove(victim_id) else { continue };
            if let Some(subsumer) = arena.get_mut(subsumer_id) {
                subsumer.numerosity += victim.numerosity;
            }
            self.remove_member(victim_id);
            // Numerosity moved to the subsumer; the population's sum only
            // shifts when exactly one of the two is a population member.
            let victim_in_population = population.remove_member(victim_id);
            match (subsumer_in_population, victim_in_population) {
                (true, false) => population.numerosity_sum += victim.numerosity,
                (false, true) => population.numerosity_sum -= victim.numerosity,
                _ => {}
            }
        }
    }

    /// Genetic discovery on an action set, inserting offspring into the
    /// population.
    ///
    /// Skips entirely unless the current episode exceeds the set's mean
    /// time stamp by the configured generation gap. Otherwise: stamp all
    /// members, select two parents by fitness-proportional roulette, clone
    /// them as fresh offspring, apply crossover (with its configured
    /// probability) and mutation, blend the offsprings' prediction / error
    /// / fitness (error and fitness reduced), then subsume-or-insert each
    /// child and trim the population back to its cap.
    ///
    /// Call only after the action set has been folded into the population,
    /// so parent numerosity bumps are visible in the population's sum.
    pub fn run_discovery<R: Rng>(
        &mut self,
        population: &mut RuleSet,
        arena: &mut RuleArena,
        episode: u64,
        action_count: usize,
        params: &Params,
        rng: &mut R,
    ) {
        if self.members.is_empty()
            || (episode as f64) - self.mean_time_stamp(arena) < params.discovery_threshold
        {
            return;
        }
        for &id in &self.members {
            if let Some(rule) = arena.get_mut(id) {
                rule.time_stamp = episode;
            }
        }

        let fitness_sum = self.fitness_sum(arena);
        let Some(parent1_id) = self.select_roulette(arena, fitness_sum, rng) else {
            return;
        };
        let Some(parent2_id) = self.select_roulette(arena, fitness_sum, rng) else {
            return;
        };

        let Some(mut child1) = arena.get(parent1_id).map(Rule::spawn) else { return };
        let Some(mut child2) = arena.get(parent2_id).map(Rule::spawn) else { return };

        if rng.gen_bool(params.crossover_prob) {
            child1.two_point_crossover(&mut child2, rng);
        }
        child1.mutate(action_count, params, rng);
        child2.mutate(action_count, params, rng);

        // Offspring share blended statistics; error and fitness are
        // reduced to temper optimism about untested rules.
        let prediction = (child1.prediction + child2.prediction) / 2.0;
        let error =
            params.error_reduction * (child1.prediction_error + child2.prediction_error) / 2.0;
        let fitness = params.fitness_reduction * (child1.fitness + child2.fitness) / 2.0;
        for child in [&mut child1, &mut child2] {
            child.prediction = prediction;
            child.prediction_error = error;
            child.fitness = fitness;
        }

        for child in [child1, child2] {
            self.insert_offspring(population, arena, child, [parent1_id, parent2_id], params, rng);
        }

        while population.numerosity_sum > params.max_population {
            if population.delete_roulette(arena, params, rng).is_none() {
                break;
            }
        }
    }

    /// Place one offspring: try GA subsumption by either parent, then by
    /// any qualified action-set member (random choice among candidates),
    /// and only then insert into the population.
    fn insert_offspring<R: Rng>(
        &mut self,
        population: &mut RuleSet,
        arena: &mut RuleArena,
        child: Rule,
        parents: [RuleId; 2],
        params: &Params,
        rng: &mut R,
    ) {
        if params.ga_subsumption {
            for parent_id in parents {
                if arena.get(parent_id).is_some_and(|p| p.subsumes(&child, params)) {
                    self.absorb_micro_rule(population, arena, parent_id);
                    return;
                }
            }
            let candidates: Vec<RuleId> = self
                .members
                .iter()
                .copied()
                .filter(|&id| arena.get(id).is_some_and(|r| r.subsumes(&child, params)))
                .collect();
            if !candidates.is_empty() {
                let chosen = candidates[rng.gen_range(0..candidates.len())];
                self.absorb_micro_rule(population, arena, chosen);
                return;
            }
        }
        population.insert(arena, child);
    }

    /// Credit one extra micro-rule to a subsuming member, keeping this
    /// set's and the population's cached sums in step.
    fn absorb_micro_rule(
        &mut self,
        population: &mut RuleSet,
        arena: &mut RuleArena,
        id: RuleId,
    ) {
        if let Some(rule) = arena.get_mut(id) {
            rule.numerosity += 1;
        }
        if self.contains(id) {
            self.numerosity_sum += 1;
        }
        if population.contains(id) {
            population.numerosity_sum += 1;
        }
    }

    /// Fold an action set into the population.
    ///
    /// Members already in the population are shared records and need no
    /// work. A member the population lacks is merged into an identical
    /// population rule if one exists (the member handle is rewritten to
    /// the surviving record), otherwise linked as-is.
    pub fn fold_into(&mut self, population: &mut RuleSet, arena: &mut RuleArena) {
        for member in &mut self.members {
            let id = *member;
            if population.contains(id) {
                continue;
            }
            let Some(rule) = arena.get(id) else { continue };
            let (condition, action, numerosity) =
                (rule.condition.clone(), rule.action, rule.numerosity);
            if let Some(existing) = population.find_identical(arena, &condition, action) {
                if let Some(survivor) = arena.get_mut(existing) {
                    survivor.numerosity += numerosity;
                }
                population.numerosity_sum += numerosity;
                arena.remove(id);
                *member = existing;
            } else {
                population.members.push(id);
                population.numerosity_sum += numerosity;
            }
        }
    }
}

/// Build a match set for `situation` from the population, covering every
/// missing action.
///
/// Matching population rules are linked into the new set. Uncovered
/// actions get a synthesized rule (condition generalized from the
/// situation, initial action-set-size estimate of the match numerosity
/// plus one) inserted into both the population and the match set. Whenever
/// an insertion pushes the population over its cap, roulette deletion
/// trims it; a deletion that empties an action out of the match set
/// re-triggers covering. The loop runs to a fixed point, which exists
/// whenever the cap is at least the action count.
pub fn build_match_set<R: Rng>(
    population: &mut RuleSet,
    arena: &mut RuleArena,
    situation: &Condition,
    action_count: usize,
    episode: u64,
    params: &Params,
    rng: &mut R,
) -> RuleSet {
    let mut match_set = RuleSet::new();
    let matching: Vec<RuleId> = population
        .members()
        .iter()
        .copied()
        .filter(|&id| arena.get(id).is_some_and(|r| r.matches(situation)))
        .collect();
    for id in matching {
        match_set.link(arena, id);
    }

    loop {
        for action in 0..action_count {
            if match_set.is_action_covered(arena, action) {
                continue;
            }
            let rule = Rule::covering(
                situation,
                action,
                f64::from(match_set.numerosity_sum + 1),
                episode,
                params,
                rng,
            );
            let (id, merged) = population.insert(arena, rule);
            if merged {
                // An identical population rule matches the same situation,
                // so it is already a match member; count the extra copy.
                debug_assert!(match_set.contains(id));
                match_set.numerosity_sum += 1;
            } else {
                match_set.link(arena, id);
            }
        }

        let mut uncovered = false;
        while population.numerosity_sum() > params.max_population {
            let Some(deleted) = population.delete_roulette(arena, params, rng) else {
                break;
            };
            let was_member = match_set.contains(deleted.id);
            match_set.sync_deletion(deleted);
            if was_member
                && deleted.removed
                && !match_set.is_action_covered(arena, deleted.action)
            {
                uncovered = true;
            }
        }
        if !uncovered {
            return match_set;
        }
    }
}
