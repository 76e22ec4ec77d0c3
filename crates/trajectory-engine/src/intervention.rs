//! # Intervention Testing
//!
//! Re-projects a trajectory under one of the pathways offered at one of its
//! decision points and compares the result with the deterministic baseline.

use serde::{Deserialize, Serialize};

use crate::config::{InterventionConfig, ProjectionConfig};
use crate::error::{EngineError, Result};
use crate::projection::{branch, reproject};
use crate::trajectory::Trajectory;

/// Caller-owned request: which decision point, which pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionScenario {
    /// Position in `trajectory.decision_points`
    pub decision_index: usize,
    /// Position in that decision point's `pathways`
    pub pathway_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionOutcome {
    pub scenario: InterventionScenario,
    pub trajectory: Trajectory,
    /// Area between the intervened and baseline primary outcome (positive = better)
    pub outcome_gain: f64,
    /// `outcome_gain` weighted by the pathway's probability
    pub expected_value: f64,
    /// `outcome_gain / cost`; None for zero-cost pathways
    pub roi: Option<f64>,
    /// Time from the decision until the outcomes first differ by `impact_epsilon`
    pub time_to_impact: Option<f64>,
}

pub fn evaluate_intervention(
    trajectory: &Trajectory,
    scenario: InterventionScenario,
    projection: &ProjectionConfig,
    config: &InterventionConfig,
) -> Result<InterventionOutcome> {
    config.validate()?;
    let decision = trajectory
        .decision_points
        .get(scenario.decision_index)
        .ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "decision point {} does not exist ({} detected)",
                scenario.decision_index,
                trajectory.decision_points.len()
            ))
        })?;
    let pathway = decision.pathways.get(scenario.pathway_index).ok_or_else(|| {
        EngineError::InvalidConfig(format!(
            "pathway {} does not exist at decision index {} ({} offered)",
            scenario.pathway_index,
            decision.index,
            decision.pathways.len()
        ))
    })?;

    let baseline = reproject(trajectory, projection)?;
    let alternative = branch(trajectory, decision, pathway, projection)?;

    let g = trajectory.granularity;
    let diffs: Vec<f64> = alternative.points[decision.index..]
        .iter()
        .zip(&baseline.points[decision.index..])
        .map(|(a, b)| a.mean() - b.mean())
        .collect();
    let outcome_gain: f64 = diffs.iter().sum::<f64>() * g;
    let time_to_impact = diffs
        .iter()
        .position(|d| d.abs() > config.impact_epsilon)
        .map(|k| k as f64 * g);

    tracing::debug!(
        decision = decision.index,
        pathway = %pathway.label,
        outcome_gain,
        "Intervention evaluated"
    );

    Ok(InterventionOutcome {
        scenario,
        trajectory: alternative,
        outcome_gain,
        expected_value: pathway.probability * outcome_gain,
        roi: (pathway.cost > 0.0).then(|| outcome_gain / pathway.cost),
        time_to_impact,
    })
}
