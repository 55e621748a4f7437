use crate::expr::EvalError;
use std::fmt;
use thiserror::Error;

/// Where an expression was being evaluated when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Construction-time evaluation of the initial conditions.
    Initialization,
    /// Evaluation inside a run, at the given step index.
    Step(usize),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Initialization => write!(f, "during initialization"),
            Phase::Step(i) => write!(f, "at step {i}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Malformed equation '{statement}': {reason}")]
    MalformedEquation { statement: String, reason: String },

    #[error("'{name}' is reserved and cannot be declared as a variable")]
    ReservedName { name: String },

    #[error("Variable '{name}' is declared more than once")]
    DuplicateVariable { name: String },

    #[error("Invalid expression for '{variable}' ('{expression}'): {message}")]
    InvalidExpression {
        variable: String,
        expression: String,
        message: String,
    },

    #[error("Cannot evaluate '{variable}' {phase}: {source}")]
    NameResolution {
        variable: String,
        phase: Phase,
        #[source]
        source: EvalError,
    },

    #[error("Dynamics variable '{name}' has no initial condition")]
    MissingVariable { name: String },

    #[error("History lookup failed for '{variable}' {phase}: {source}")]
    HistoryIndex {
        variable: String,
        phase: Phase,
        #[source]
        source: EvalError,
    },

    #[error("Invalid run parameters: {0}")]
    InvalidRunParameters(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

impl SimError {
    /// Attaches the evaluated variable and phase to a VM failure.
    pub fn from_eval(err: EvalError, variable: &str, expression: &str, phase: Phase) -> Self {
        let variable = variable.to_string();
        match err {
            EvalError::HistoryIndex { .. } => SimError::HistoryIndex {
                variable,
                phase,
                source: err,
            },
            EvalError::StackUnderflow => SimError::InvalidExpression {
                variable,
                expression: expression.to_string(),
                message: err.to_string(),
            },
            EvalError::UnknownName(_) | EvalError::Unassigned(_) | EvalError::Unbound(_) => {
                SimError::NameResolution {
                    variable,
                    phase,
                    source: err,
                }
            }
        }
    }
}
