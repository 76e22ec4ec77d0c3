//! # Trajectory Types
//!
//! Table of Contents:
//! 1. TrajectoryPoint — One time step with bounds
//! 2. CascadeMetadata — Cascade summary carried with every trajectory
//! 3. UncertaintySummary / BranchOrigin
//! 4. Trajectory — Point series, branches, detected events

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cascade::{CascadeActivation, CascadeResult, FeedbackLoop};
use crate::config::ConfidenceDecay;
use crate::decision::{AlternativePathway, DecisionPoint};
use crate::domain::{Domain, StateField, StateVector};
use crate::error::{EngineError, Result};
use crate::inflection::InflectionPoint;
use crate::projection::ShockSchedule;

/// Average Gregorian month, used when a trajectory is anchored to a date.
const SECONDS_PER_MONTH: f64 = 2_629_746.0;

// ─────────────────────────────────────────────
// 1. TrajectoryPoint
// ─────────────────────────────────────────────

/// One step of a trajectory.
///
/// Bounds refer to the primary outcome metric and always satisfy
/// `confidence_lower <= state.primary_outcome <= confidence_upper`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub timestamp: f64,
    /// Point estimate (deterministic projection) or Monte Carlo mean
    pub state: StateVector,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    /// Nominal confidence level of the bounds (None for point estimates)
    pub confidence_level: Option<f64>,
    /// Latest cascade wave that has landed by this step
    pub wave_index: Option<u32>,
}

impl TrajectoryPoint {
    /// Point estimate with zero-width bounds.
    pub fn point_estimate(timestamp: f64, state: StateVector, wave_index: Option<u32>) -> Self {
        Self {
            timestamp,
            state,
            confidence_lower: state.primary_outcome,
            confidence_upper: state.primary_outcome,
            confidence_level: None,
            wave_index,
        }
    }

    pub fn mean(&self) -> f64 {
        self.state.primary_outcome
    }

    pub fn interval_width(&self) -> f64 {
        self.confidence_upper - self.confidence_lower
    }
}

// ─────────────────────────────────────────────
// 2. CascadeMetadata
// ─────────────────────────────────────────────

/// Cascade summary attached to a trajectory.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CascadeMetadata {
    pub depth: u32,
    pub wave_count: usize,
    pub affected_domains: BTreeMap<Domain, usize>,
    pub feedback_loops: Vec<FeedbackLoop>,
    pub loops_truncated: bool,
    /// Propagation stopped at the event cap; activations are incomplete
    #[serde(default)]
    pub events_truncated: bool,
    pub activations: Vec<CascadeActivation>,
}

impl From<&CascadeResult> for CascadeMetadata {
    fn from(result: &CascadeResult) -> Self {
        Self {
            depth: result.depth(),
            wave_count: result.wave_count(),
            affected_domains: result.domain_histogram(),
            feedback_loops: result.feedback_loops.clone(),
            loops_truncated: result.loops_truncated,
            events_truncated: result.events_truncated,
            activations: result.activations.clone(),
        }
    }
}

impl CascadeMetadata {
    /// Copy without the activation list and loop members.
    pub fn summary(&self) -> Self {
        Self {
            feedback_loops: Vec::new(),
            activations: Vec::new(),
            ..self.clone()
        }
    }

    /// Activations whose time falls in `[from, to)`.
    pub fn activations_between(&self, from: f64, to: f64) -> impl Iterator<Item = &CascadeActivation> {
        self.activations
            .iter()
            .filter(move |a| a.activation_time >= from && a.activation_time < to)
    }
}

// ─────────────────────────────────────────────
// 3. UncertaintySummary / BranchOrigin
// ─────────────────────────────────────────────

/// How the confidence bounds of a trajectory were produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintySummary {
    pub n_simulations: u64,
    pub noise_std: f64,
    /// Base seed actually used (reported even when the caller passed none)
    pub seed: u64,
    pub decay: ConfidenceDecay,
    /// Solved decay rate λ
    pub lambda: f64,
}

/// Decision point and pathway a branch was projected from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchOrigin {
    pub decision_index: usize,
    pub timestamp: f64,
    pub pathway: AlternativePathway,
}

// ─────────────────────────────────────────────
// 4. Trajectory
// ─────────────────────────────────────────────

/// A projected multivariate outcome trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub horizon: f64,
    pub granularity: f64,
    /// Calendar date of timestamp 0 (time unit = months)
    pub origin: Option<DateTime<Utc>>,
    /// Pre-shock state; recovery pulls toward it
    pub initial_state: StateVector,
    /// Per-step domain shocks the points were stepped from
    pub schedule: ShockSchedule,
    /// Time-ascending
    pub points: Vec<TrajectoryPoint>,
    pub branches: Vec<Trajectory>,
    /// Set on branch trajectories
    pub branch_origin: Option<BranchOrigin>,
    pub decision_points: Vec<DecisionPoint>,
    pub inflection_points: Vec<InflectionPoint>,
    pub cascade: CascadeMetadata,
    pub uncertainty: Option<UncertaintySummary>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn primary_series(&self) -> Vec<f64> {
        self.field_series(StateField::PrimaryOutcome)
    }

    pub fn field_series(&self, field: StateField) -> Vec<f64> {
        self.points.iter().map(|p| p.state.get(field)).collect()
    }

    /// State the system is in just before step `index` is applied.
    pub fn state_before(&self, index: usize) -> StateVector {
        match index {
            0 => self.initial_state,
            i => self
                .points
                .get(i - 1)
                .map(|p| p.state)
                .unwrap_or(self.initial_state),
        }
    }

    /// Calendar date of point `index`, when the trajectory has an origin.
    pub fn calendar_date(&self, index: usize) -> Option<DateTime<Utc>> {
        let origin = self.origin?;
        let point = self.points.get(index)?;
        let seconds = (point.timestamp * SECONDS_PER_MONTH).round() as i64;
        origin.checked_add_signed(Duration::try_seconds(seconds)?)
    }

    /// Largest primary-outcome gap to `other` over the shared indices.
    pub fn max_divergence(&self, other: &Trajectory) -> f64 {
        self.points
            .iter()
            .zip(&other.points)
            .map(|(a, b)| (a.mean() - b.mean()).abs())
            .fold(0.0, f64::max)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored trajectory, rejecting records whose points, schedule
    /// and detected events disagree on the grid.
    pub fn from_json(text: &str) -> Result<Self> {
        let trajectory: Trajectory = serde_json::from_str(text)?;
        trajectory.validate()?;
        Ok(trajectory)
    }

    /// Check that every index the trajectory carries fits its grid.
    pub fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| -> Result<()> { Err(EngineError::Serialization(msg)) };
        if !(self.horizon.is_finite() && self.horizon > 0.0) {
            return corrupt(format!("horizon must be finite and positive, got {}", self.horizon));
        }
        if self.granularity != self.schedule.granularity() {
            return corrupt(format!(
                "granularity {} disagrees with the shock schedule's {}",
                self.granularity,
                self.schedule.granularity()
            ));
        }
        if self.points.len() != self.schedule.steps() {
            return corrupt(format!(
                "{} points for a {}-step shock schedule",
                self.points.len(),
                self.schedule.steps()
            ));
        }
        let len = self.points.len();
        if let Some(d) = self.decision_points.iter().find(|d| d.index >= len) {
            return corrupt(format!("decision point index {} is outside {len} points", d.index));
        }
        if let Some(p) = self.inflection_points.iter().find(|p| p.index >= len) {
            return corrupt(format!("inflection point index {} is outside {len} points", p.index));
        }
        if let Some(origin) = self.branch_origin.as_ref().filter(|o| o.decision_index >= len) {
            return corrupt(format!(
                "branch decision index {} is outside {len} points",
                origin.decision_index
            ));
        }
        self.branches.iter().try_for_each(Trajectory::validate)
    }
}
