//! Error types for trajectory-engine
//!
//! ## Table of Contents
//! 1. EngineError - Main error enum
//! 2. Stage - Which pipeline stage produced a divergence
//! 3. Result type alias

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::StateField;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while simulating, projecting or analysing a trajectory.
///
/// Every error is local to a single call. Nothing is retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Graph rejected before any computation started
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// A non-finite value appeared in a state vector
    #[error(
        "Simulation diverged during {stage}: non-finite {field} at step {step}{}",
        .run.map(|r| format!(" (run {r})")).unwrap_or_default()
    )]
    SimulationDivergence {
        stage: Stage,
        step: usize,
        field: StateField,
        run: Option<u64>,
    },

    /// Requested simulation volume exceeds the configured budget
    #[error("Resource budget exceeded: requested {requested} bytes, limit {limit} bytes")]
    ResourceBudgetExceeded { requested: u64, limit: u64 },

    /// Parameter or configuration out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::InvalidConfig(err.to_string())
    }
}

/// Pipeline stage tag carried by [`EngineError::SimulationDivergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Projection,
    Branch,
    MonteCarlo,
    Resimulation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Projection => write!(f, "projection"),
            Self::Branch => write!(f, "branch projection"),
            Self::MonteCarlo => write!(f, "Monte Carlo sampling"),
            Self::Resimulation => write!(f, "decision re-simulation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_message_names_run() {
        let err = EngineError::SimulationDivergence {
            stage: Stage::MonteCarlo,
            step: 4,
            field: StateField::StabilityIndex,
            run: Some(17),
        };
        let msg = err.to_string();
        assert!(msg.contains("Monte Carlo"));
        assert!(msg.contains("stability_index"));
        assert!(msg.ends_with("(run 17)"), "{msg}");
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("= broken");
        let err: EngineError = parsed.unwrap_err().into();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }
}
