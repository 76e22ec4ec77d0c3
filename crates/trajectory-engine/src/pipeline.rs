//! # Pipeline
//!
//! Runs cascade → projection → uncertainty → detection for one breach
//! request and attaches one branch per (decision point, pathway).
//!
//! Stages run strictly in order. A caller that wants to abandon a run does
//! so between calls; nothing inside a stage is cancellable.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cascade::simulate;
use crate::config::EngineConfig;
use crate::decision::detect_decisions;
use crate::domain::StateVector;
use crate::error::{EngineError, Result};
use crate::graph::{DependencyGraph, NodeId};
use crate::inflection::detect_inflections;
use crate::projection::{branch, project, step_count};
use crate::trajectory::Trajectory;
use crate::uncertainty::{estimate, working_set_bytes};

/// Breach specification supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachRequest {
    /// Origin node ids; empty means the graph's own breach nodes
    #[serde(default)]
    pub breach_nodes: Vec<String>,
    pub horizon: f64,
    pub granularity: f64,
    /// Nominal confidence at t = 0 (overrides the configured start level)
    #[serde(default)]
    pub confidence_level: Option<f64>,
    #[serde(default)]
    pub n_simulations: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub initial_state: StateVector,
    /// Calendar date of t = 0
    #[serde(default)]
    pub origin: Option<DateTime<Utc>>,
}

impl BreachRequest {
    /// Monthly request over `horizon` months with every other setting defaulted.
    pub fn monthly(horizon: f64) -> Self {
        Self {
            breach_nodes: Vec::new(),
            horizon,
            granularity: 1.0,
            confidence_level: None,
            n_simulations: None,
            seed: None,
            initial_state: StateVector::default(),
            origin: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_simulations(mut self, n: u64) -> Self {
        self.n_simulations = Some(n);
        self
    }

    fn resolve_breach(&self, graph: &DependencyGraph) -> Result<Vec<NodeId>> {
        if self.breach_nodes.is_empty() {
            return Ok(graph.breach_nodes().to_vec());
        }
        self.breach_nodes
            .iter()
            .map(|id| {
                graph
                    .resolve(id)
                    .ok_or_else(|| EngineError::InvalidGraph(format!("breach node '{id}' is not in the graph")))
            })
            .collect()
    }
}

/// Run the full pipeline for one breach.
pub fn run_pipeline(graph: &DependencyGraph, request: &BreachRequest, config: &EngineConfig) -> Result<Trajectory> {
    let mut config = config.clone();
    if let Some(level) = request.confidence_level {
        config.uncertainty.decay.start_level = level;
        config.uncertainty.decay.floor_level = config.uncertainty.decay.floor_level.min(level);
    }
    if let Some(n) = request.n_simulations {
        config.uncertainty.n_simulations = n;
    }
    if request.seed.is_some() {
        config.uncertainty.seed = request.seed;
    }
    config.validate()?;
    let steps = step_count(request.horizon, request.granularity)?;
    config
        .uncertainty
        .budget
        .check(working_set_bytes(config.uncertainty.n_simulations, steps as u64))?;

    let breach = request.resolve_breach(graph)?;
    let started = Instant::now();

    let cascade = simulate(graph, &breach, &config.cascade, &config.tables)?;
    tracing::info!(
        activations = cascade.activations.len(),
        waves = cascade.wave_count(),
        loops = cascade.feedback_loops.len(),
        loops_truncated = cascade.loops_truncated,
        "Cascade stage complete"
    );

    let mut trajectory = project(
        &cascade,
        &request.initial_state,
        request.horizon,
        request.granularity,
        &config.projection,
    )?;
    trajectory.origin = request.origin;
    tracing::info!(steps = trajectory.len(), "Projection stage complete");

    let mut trajectory = estimate(&trajectory, &config.projection, &config.uncertainty)?;

    trajectory.decision_points =
        detect_decisions(&trajectory, &config.detector, &config.projection, &config.tables)?;
    trajectory.inflection_points = detect_inflections(&trajectory, &config.inflection)?;

    // Branches keep the cascade summary; activations and loops live on the parent.
    let summary = trajectory.cascade.summary();
    let mut branches = Vec::new();
    for decision in &trajectory.decision_points {
        for pathway in &decision.pathways {
            let mut alternative = branch(&trajectory, decision, pathway, &config.projection)?;
            alternative.cascade = summary.clone();
            branches.push(alternative);
        }
    }
    trajectory.branches = branches;

    tracing::info!(
        decisions = trajectory.decision_points.len(),
        inflections = trajectory.inflection_points.len(),
        branches = trajectory.branches.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Pipeline complete"
    );

    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    fn graph() -> DependencyGraph {
        DependencyGraph::builder()
            .node("grid", Domain::Technological)
            .node("markets", Domain::Economic)
            .node("unrest", Domain::Social)
            .edge("grid", "markets", 0.9)
            .edge("markets", "unrest", 0.8)
            .breach("grid")
            .build()
            .unwrap()
    }

    #[test]
    fn test_pipeline_attaches_everything() {
        let request = BreachRequest::monthly(36.0).with_seed(11).with_simulations(500);
        let t = run_pipeline(&graph(), &request, &EngineConfig::default()).unwrap();
        assert_eq!(t.len(), 36);
        assert!(t.uncertainty.is_some());
        assert!(!t.decision_points.is_empty());
        let expected: usize = t.decision_points.iter().map(|d| d.pathways.len()).sum();
        assert_eq!(t.branches.len(), expected);
        assert!(t.branches.iter().all(|b| b.branch_origin.is_some()));
        assert_eq!(t.cascade.affected_domains.len(), 3);
        for b in &t.branches {
            assert!(b.cascade.activations.is_empty());
            assert_eq!(b.cascade.depth, t.cascade.depth);
            assert_eq!(b.cascade.affected_domains, t.cascade.affected_domains);
        }
    }

    #[test]
    fn test_budget_checked_before_any_stage() {
        let request = BreachRequest::monthly(60.0).with_seed(2).with_simulations(100_000);
        let mut config = EngineConfig::default();
        config.projection.sensitivity[Domain::Technological.index()][0] = f64::NAN;
        assert!(matches!(
            run_pipeline(&graph(), &request.clone().with_simulations(10), &config),
            Err(EngineError::SimulationDivergence { .. })
        ));

        config.uncertainty.budget.max_buffer_bytes = 1024 * 1024;
        assert!(matches!(
            run_pipeline(&graph(), &request, &config),
            Err(EngineError::ResourceBudgetExceeded { limit: 1_048_576, .. })
        ));
    }

    #[test]
    fn test_unknown_breach_rejected() {
        let request = BreachRequest {
            breach_nodes: vec!["nowhere".into()],
            ..BreachRequest::monthly(12.0)
        };
        assert!(matches!(
            run_pipeline(&graph(), &request, &EngineConfig::default()),
            Err(EngineError::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_confidence_override_sets_start_level() {
        let request = BreachRequest {
            confidence_level: Some(0.9),
            ..BreachRequest::monthly(12.0).with_seed(1).with_simulations(200)
        };
        let t = run_pipeline(&graph(), &request, &EngineConfig::default()).unwrap();
        let level = t.points[0].confidence_level.unwrap();
        assert!((level - 0.9).abs() < 1e-12);
    }
}
