// Allow unwrap and unreadable literals in tests (test code is not production)
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::unreadable_literal))]
//! XCS: an accuracy-based learning classifier system.
//!
//! This crate implements the rule engine of an XCS-style learning classifier
//! system: a decision-maker that learns situation-to-action mappings from
//! trial-and-error reward signals while a genetic algorithm continuously
//! discovers and prunes candidate rules.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Engine (decision cycle)        │
//! ├─────────────────────────────────────┤
//! │  Match set │ Action set │ Discovery │
//! ├─────────────────────────────────────┤
//! │     Rule arena + population         │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use xcs::{Engine, Params};
//!
//! let mut engine = Engine::new(Params::default());
//! let decision = engine.decide("0101101", 8)?;
//! engine.open_action_set(decision.action)?;
//! engine.credit_reward(decision.rule, 5.0)?;
//! engine.end_episode()?;
//! # Ok::<(), xcs::EngineError>(())
//! ```
//!
//! One decision cycle runs `decide` → `open_action_set` → any number of
//! `credit_reward` calls → `end_episode`. Rule handles returned by `decide`
//! are valid only until `end_episode`, which may delete or merge rules.

pub mod collection;
pub mod engine;
pub mod error;
pub mod params;
pub mod prediction;
pub mod rule;

pub use collection::{RuleArena, RuleId, RuleSet};
pub use engine::{Decision, Engine, RuleRecord};
pub use error::{EngineError, Phase};
pub use params::Params;
pub use prediction::PredictionArray;
pub use rule::{Condition, Rule, Symbol};
