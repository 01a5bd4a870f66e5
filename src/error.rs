//! Error types for the rule engine.

use std::fmt;

/// The phase of the decision cycle an [`crate::Engine`] is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No decision in progress.
    Idle,
    /// A match set has been built; waiting for the action set to open.
    MatchBuilt,
    /// An action set is open and accepting reward credits.
    ActionSetOpen,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::MatchBuilt => write!(f, "match built"),
            Phase::ActionSetOpen => write!(f, "action set open"),
        }
    }
}

/// Errors raised at the engine boundary.
///
/// All variants indicate a caller or configuration bug, not a runtime
/// condition the engine recovers from. Internal self-healing (numerosity
/// underflow, pruned reward targets) is handled silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A situation contained a character outside `{'0', '1', '#'}`.
    InvalidSymbol(char),
    /// A situation's length did not match the engine's condition length.
    SituationLength {
        /// Length fixed by the first decision.
        expected: usize,
        /// Length of the offending situation.
        got: usize,
    },
    /// The action count differed from the one fixed by the first
    /// decision; it is stable for the engine's lifetime.
    ActionCountChanged {
        /// Action count established by the first decision.
        expected: usize,
        /// Action count of the offending call.
        got: usize,
    },
    /// An action index was outside `[0, action_count)`.
    ActionOutOfRange {
        /// The offending action.
        action: usize,
        /// Number of possible actions.
        action_count: usize,
    },
    /// The action count exceeds the population cap, so covering plus
    /// deletion could loop without ever representing every action.
    CapTooSmall {
        /// Configured maximum population numerosity.
        max_population: u32,
        /// Requested number of actions.
        action_count: usize,
    },
    /// An operation was called in the wrong phase of the decision cycle.
    WrongPhase {
        /// Phase the operation requires.
        expected: Phase,
        /// Phase the engine was in.
        found: Phase,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidSymbol(c) => {
                write!(f, "invalid condition symbol {c:?} (expected '0', '1' or '#')")
            }
            EngineError::SituationLength { expected, got } => {
                write!(f, "situation length {got} does not match condition length {expected}")
            }
            EngineError::ActionCountChanged { expected, got } => {
                write!(f, "action count {got} does not match the established count {expected}")
            }
            EngineError::ActionOutOfRange { action, action_count } => {
                write!(f, "action {action} out of range (action count {action_count})")
            }
            EngineError::CapTooSmall { max_population, action_count } => {
                write!(
                    f,
                    "population cap {max_population} cannot cover {action_count} actions"
                )
            }
            EngineError::WrongPhase { expected, found } => {
                write!(f, "operation requires phase {expected:?}, engine is {found:?}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::SituationLength { expected: 7, got: 4 };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains('4'));

        let err = EngineError::WrongPhase {
            expected: Phase::ActionSetOpen,
            found: Phase::Idle,
        };
        assert!(err.to_string().contains("Idle"));
    }
}
