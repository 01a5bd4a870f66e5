//! Engine configuration.
//!
//! All thresholds, probabilities and learning rates live in one immutable
//! value passed explicitly to the engine. Nothing here is process-global,
//! so independent engines with separate seeds can run in parallel with no
//! shared state.

use serde::{Deserialize, Serialize};

/// Configuration for a rule engine instance.
///
/// Defaults follow the standard XCS parameterization (Butz & Wilson):
/// low learning rate, accuracy threshold ε₀ = 10, power-law accuracy
/// fall-off, and both subsumption mechanisms enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Params {
    /// Maximum total numerosity of the population (micro-rule cap).
    pub max_population: u32,
    /// Learning rate β for prediction, error, action-set-size and fitness
    /// updates. Rules with experience below `1/β` use a plain incremental
    /// average instead of the exponential moving average.
    pub learning_rate: f64,
    /// Scale factor α of the accuracy power function.
    pub accuracy_falloff: f64,
    /// Exponent ν of the accuracy power function.
    pub accuracy_exponent: f64,
    /// Prediction-error threshold ε₀ below which a rule counts as fully
    /// accurate.
    pub error_threshold: f64,
    /// Fraction δ of the mean population fitness below which a rule's low
    /// fitness amplifies its deletion vote.
    pub deletion_fitness_fraction: f64,
    /// Experience θ_del a rule needs before low fitness counts against it
    /// in deletion.
    pub deletion_experience: u32,
    /// Generation gap θ_GA: discovery runs only when the current episode
    /// exceeds the action set's mean time stamp by at least this much.
    pub discovery_threshold: f64,
    /// Experience θ_sub a rule needs to qualify as a subsumer.
    pub subsumption_experience: u32,
    /// Probability of applying two-point crossover to offspring.
    pub crossover_prob: f64,
    /// Per-position probability of mutating a condition symbol, and the
    /// probability of mutating the action.
    pub mutation_prob: f64,
    /// Per-position probability of generalizing to don't-care when
    /// covering a situation.
    pub dont_care_prob: f64,
    /// Factor applied to offspring prediction error.
    pub error_reduction: f64,
    /// Factor applied to offspring fitness.
    pub fitness_reduction: f64,
    /// Initial prediction for covered rules.
    pub prediction_init: f64,
    /// Initial prediction error for covered rules.
    pub error_init: f64,
    /// Initial fitness for covered rules.
    pub fitness_init: f64,
    /// Whether discovery offers offspring to their parents and the action
    /// set for subsumption before inserting them.
    pub ga_subsumption: bool,
    /// Whether the action set is condensed by subsumption at episode end.
    pub action_set_subsumption: bool,
    /// RNG seed for this engine instance.
    pub seed: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_population: 50,
            learning_rate: 0.001,
            accuracy_falloff: 0.1,
            accuracy_exponent: 5.0,
            error_threshold: 10.0,
            deletion_fitness_fraction: 0.1,
            deletion_experience: 5,
            discovery_threshold: 3.0,
            subsumption_experience: 5,
            crossover_prob: 0.8,
            mutation_prob: 0.05,
            dont_care_prob: 0.5,
            error_reduction: 0.25,
            fitness_reduction: 0.1,
            prediction_init: 10.0,
            error_init: 0.0,
            fitness_init: 0.01,
            ga_subsumption: true,
            action_set_subsumption: true,
            seed: 42,
        }
    }
}
