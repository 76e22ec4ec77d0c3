//! # Trajectory Engine
//!
//! Turns a [`CascadeResult`] into a discretized multivariate time series.
//!
//! Table of Contents:
//! 1. ShockSchedule — Per-step, per-domain shock totals
//! 2. project / reproject — Deterministic baseline projection
//! 3. branch — Re-projection under an alternative pathway
//!
//! Step `i` covers `[i * granularity, (i + 1) * granularity)`. Every
//! activation landing in that window adds its magnitude to its domain's cell
//! for the step. The point at index `i` is the state after step `i` has been
//! applied and has timestamp `i * granularity`.

use serde::{Deserialize, Serialize};

use crate::cascade::{CascadeActivation, CascadeResult};
use crate::config::ProjectionConfig;
use crate::decision::{AlternativePathway, DecisionPoint};
use crate::domain::{Domain, StateVector, DOMAIN_COUNT};
use crate::error::{EngineError, Result, Stage};
use crate::kernel::StepKernel;
use crate::trajectory::{BranchOrigin, CascadeMetadata, Trajectory, TrajectoryPoint};

// ─────────────────────────────────────────────
// 1. ShockSchedule
// ─────────────────────────────────────────────

/// Flat `steps × DOMAIN_COUNT` table of shock magnitudes.
///
/// Deserialization rejects tables whose shape does not match `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleRecord")]
pub struct ShockSchedule {
    steps: usize,
    granularity: f64,
    cells: Vec<f64>,
}

#[derive(Deserialize)]
struct ScheduleRecord {
    steps: usize,
    granularity: f64,
    cells: Vec<f64>,
}

impl TryFrom<ScheduleRecord> for ShockSchedule {
    type Error = EngineError;

    fn try_from(record: ScheduleRecord) -> Result<Self> {
        let schedule = Self {
            steps: record.steps,
            granularity: record.granularity,
            cells: record.cells,
        };
        schedule.validate()?;
        Ok(schedule)
    }
}

impl ShockSchedule {
    pub fn empty(steps: usize, granularity: f64) -> Self {
        Self {
            steps,
            granularity,
            cells: vec![0.0; steps * DOMAIN_COUNT],
        }
    }

    /// Bucket activations into steps; activations past the last step are dropped.
    pub fn from_activations(activations: &[CascadeActivation], steps: usize, granularity: f64) -> Self {
        let mut schedule = Self::empty(steps, granularity);
        for a in activations {
            if let Some(step) = schedule.step_of(a.activation_time) {
                schedule.cells[step * DOMAIN_COUNT + a.domain.index()] += a.magnitude;
            }
        }
        schedule
    }

    /// Check the table shape and contents.
    pub fn validate(&self) -> Result<()> {
        if !(self.granularity.is_finite() && self.granularity > 0.0) {
            return Err(EngineError::Serialization(format!(
                "shock schedule granularity must be finite and positive, got {}",
                self.granularity
            )));
        }
        let expected = self.steps.checked_mul(DOMAIN_COUNT);
        if expected != Some(self.cells.len()) {
            return Err(EngineError::Serialization(format!(
                "shock schedule has {} cells, {} steps need {}",
                self.cells.len(),
                self.steps,
                self.steps.saturating_mul(DOMAIN_COUNT)
            )));
        }
        if let Some(pos) = self.cells.iter().position(|c| !c.is_finite()) {
            return Err(EngineError::Serialization(format!(
                "shock schedule cell {pos} is not finite"
            )));
        }
        Ok(())
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn granularity(&self) -> f64 {
        self.granularity
    }

    /// Step whose window contains time `t`.
    pub fn step_of(&self, t: f64) -> Option<usize> {
        if !(t >= 0.0) {
            return None;
        }
        let step = (t / self.granularity).floor() as usize;
        (step < self.steps).then_some(step)
    }

    pub fn get(&self, step: usize, domain: Domain) -> f64 {
        self.cells
            .get(step * DOMAIN_COUNT + domain.index())
            .copied()
            .unwrap_or(0.0)
    }

    /// Copy of one step's shocks, in [`Domain::ALL`] order.
    #[inline]
    pub fn row(&self, step: usize) -> [f64; DOMAIN_COUNT] {
        let mut row = [0.0; DOMAIN_COUNT];
        let start = step * DOMAIN_COUNT;
        if let Some(cells) = self.cells.get(start..start + DOMAIN_COUNT) {
            row.copy_from_slice(cells);
        }
        row
    }

    /// Overwrite one step's shocks; out-of-range steps are ignored.
    fn set_row(&mut self, step: usize, row: &[f64; DOMAIN_COUNT]) {
        let start = step * DOMAIN_COUNT;
        if let Some(cells) = self.cells.get_mut(start..start + DOMAIN_COUNT) {
            cells.copy_from_slice(row);
        }
    }

    /// Add an extra shock at `step` on top of the cascade's own.
    pub fn inject(&mut self, step: usize, domain: Domain, magnitude: f64) -> Result<()> {
        if step >= self.steps {
            return Err(EngineError::InvalidConfig(format!(
                "shock step {step} is outside the {}-step grid",
                self.steps
            )));
        }
        if !magnitude.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "shock magnitude must be finite, got {magnitude}"
            )));
        }
        self.cells[step * DOMAIN_COUNT + domain.index()] += magnitude;
        Ok(())
    }

    /// Total shock per domain over steps `0..=through`.
    pub fn cumulative(&self, through: usize) -> [f64; DOMAIN_COUNT] {
        let mut totals = [0.0; DOMAIN_COUNT];
        for step in 0..=through.min(self.steps.saturating_sub(1)) {
            for (total, shock) in totals.iter_mut().zip(self.row(step)) {
                *total += shock;
            }
        }
        totals
    }
}

// ─────────────────────────────────────────────
// 2. project
// ─────────────────────────────────────────────

/// Number of steps for a horizon, rejecting degenerate grids.
pub(crate) fn step_count(horizon: f64, granularity: f64) -> Result<usize> {
    if !(granularity.is_finite() && granularity > 0.0) {
        return Err(EngineError::InvalidConfig(format!(
            "granularity must be finite and positive, got {granularity}"
        )));
    }
    if !(horizon.is_finite() && horizon > 0.0) {
        return Err(EngineError::InvalidConfig(format!(
            "horizon must be finite and positive, got {horizon}"
        )));
    }
    let steps = (horizon / granularity).round();
    if steps < 1.0 {
        return Err(EngineError::InvalidConfig(format!(
            "horizon {horizon} is shorter than one step of {granularity}"
        )));
    }
    Ok(steps as usize)
}

/// Latest wave landed by the end of each step.
fn waves_per_step(activations: &[CascadeActivation], schedule: &ShockSchedule) -> Vec<Option<u32>> {
    let mut waves: Vec<Option<u32>> = vec![None; schedule.steps()];
    for a in activations {
        if let Some(step) = schedule.step_of(a.activation_time) {
            waves[step] = waves[step].max(Some(a.wave_index));
        }
    }
    let mut latest = None;
    for w in waves.iter_mut() {
        latest = latest.max(*w);
        *w = latest;
    }
    waves
}

/// Step `schedule` from `initial` and return one state per step.
pub(crate) fn step_states(
    kernel: &StepKernel,
    schedule: &ShockSchedule,
    initial: &StateVector,
    stage: Stage,
) -> Result<Vec<StateVector>> {
    let mut state = initial.to_array();
    let mut states = Vec::with_capacity(schedule.steps());
    for step in 0..schedule.steps() {
        let shocks = schedule.row(step);
        kernel
            .advance(&mut state, &shocks)
            .map_err(|field| EngineError::SimulationDivergence {
                stage,
                step,
                field,
                run: None,
            })?;
        states.push(StateVector::from_array(state));
    }
    Ok(states)
}

fn point_series(states: Vec<StateVector>, granularity: f64, waves: &[Option<u32>]) -> Vec<TrajectoryPoint> {
    states
        .into_iter()
        .enumerate()
        .map(|(i, state)| {
            let wave = waves.get(i).copied().flatten();
            TrajectoryPoint::point_estimate(i as f64 * granularity, state, wave)
        })
        .collect()
}

/// Deterministic baseline projection of a cascade.
///
/// Bit-reproducible for identical inputs; no sampling happens here. Points
/// carry zero-width bounds until [`crate::uncertainty::estimate`] fills them.
pub fn project(
    cascade: &CascadeResult,
    initial_state: &StateVector,
    horizon: f64,
    granularity: f64,
    config: &ProjectionConfig,
) -> Result<Trajectory> {
    config.validate()?;
    if let Some(field) = initial_state.first_non_finite() {
        return Err(EngineError::SimulationDivergence {
            stage: Stage::Projection,
            step: 0,
            field,
            run: None,
        });
    }
    let steps = step_count(horizon, granularity)?;
    let schedule = ShockSchedule::from_activations(&cascade.activations, steps, granularity);
    let kernel = StepKernel::new(config, initial_state, granularity);
    let states = step_states(&kernel, &schedule, initial_state, Stage::Projection)?;
    let waves = waves_per_step(&cascade.activations, &schedule);

    tracing::debug!(steps, horizon, granularity, "Baseline trajectory projected");

    Ok(Trajectory {
        horizon,
        granularity,
        origin: None,
        initial_state: *initial_state,
        points: point_series(states, granularity, &waves),
        schedule,
        branches: Vec::new(),
        branch_origin: None,
        decision_points: Vec::new(),
        inflection_points: Vec::new(),
        cascade: CascadeMetadata::from(cascade),
        uncertainty: None,
    })
}

/// Deterministic re-projection of a trajectory's own shock schedule.
///
/// Used after [`ShockSchedule::inject`]. Keeps the cascade metadata and
/// origin; drops bounds, branches and detected events.
pub fn reproject(trajectory: &Trajectory, config: &ProjectionConfig) -> Result<Trajectory> {
    config.validate()?;
    let kernel = StepKernel::new(config, &trajectory.initial_state, trajectory.granularity);
    let states = step_states(
        &kernel,
        &trajectory.schedule,
        &trajectory.initial_state,
        Stage::Projection,
    )?;
    let waves = waves_per_step(&trajectory.cascade.activations, &trajectory.schedule);
    Ok(Trajectory {
        points: point_series(states, trajectory.granularity, &waves),
        branches: Vec::new(),
        decision_points: Vec::new(),
        inflection_points: Vec::new(),
        uncertainty: None,
        ..trajectory.clone()
    })
}

// ─────────────────────────────────────────────
// 3. branch
// ─────────────────────────────────────────────

/// Project the alternative future where `pathway` is taken at `decision`.
///
/// Steps before the decision index follow the unmodified schedule, so the
/// branch shares its prefix with the deterministic baseline. From the
/// decision index on, every step's shocks pass through the pathway's
/// [`InterventionKind::apply`](crate::decision::InterventionKind::apply).
pub fn branch(
    trajectory: &Trajectory,
    decision: &DecisionPoint,
    pathway: &AlternativePathway,
    config: &ProjectionConfig,
) -> Result<Trajectory> {
    config.validate()?;
    let from = decision.index;
    if from >= trajectory.schedule.steps() {
        return Err(EngineError::InvalidConfig(format!(
            "decision index {from} is outside the {}-step trajectory",
            trajectory.schedule.steps()
        )));
    }

    let mut schedule = trajectory.schedule.clone();
    for step in from..schedule.steps() {
        let mut row = schedule.row(step);
        pathway.kind.apply(&mut row, pathway.impact_modifier);
        schedule.set_row(step, &row);
    }

    let kernel = StepKernel::new(config, &trajectory.initial_state, trajectory.granularity);
    let states = step_states(&kernel, &schedule, &trajectory.initial_state, Stage::Branch)?;
    let waves: Vec<Option<u32>> = trajectory.points.iter().map(|p| p.wave_index).collect();

    Ok(Trajectory {
        horizon: trajectory.horizon,
        granularity: trajectory.granularity,
        origin: trajectory.origin,
        initial_state: trajectory.initial_state,
        points: point_series(states, trajectory.granularity, &waves),
        schedule,
        branches: Vec::new(),
        branch_origin: Some(BranchOrigin {
            decision_index: from,
            timestamp: decision.timestamp,
            pathway: pathway.clone(),
        }),
        decision_points: Vec::new(),
        inflection_points: Vec::new(),
        cascade: trajectory.cascade.clone(),
        uncertainty: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CascadeConfig, DomainTables};
    use crate::decision::InterventionKind;
    use crate::domain::StateField;
    use crate::graph::DependencyGraph;

    fn breach_only() -> CascadeResult {
        let graph = DependencyGraph::builder()
            .node("bank", Domain::Economic)
            .breach("bank")
            .build()
            .unwrap();
        crate::cascade::simulate(
            &graph,
            graph.breach_nodes(),
            &CascadeConfig::default(),
            &DomainTables::default(),
        )
        .unwrap()
    }

    fn decision_at(index: usize) -> DecisionPoint {
        DecisionPoint {
            index,
            timestamp: index as f64,
            criticality: 0.5,
            impact_score: 1.0,
            reversibility_score: 0.5,
            time_sensitivity_score: 1.0,
            future_path_variance: 0.1,
            pathways: Vec::new(),
            intervention_window: 1.0,
        }
    }

    fn pathway(kind: InterventionKind, impact_modifier: f64) -> AlternativePathway {
        AlternativePathway {
            label: "test".into(),
            kind,
            impact_modifier,
            probability: 1.0,
            cost: 0.5,
        }
    }

    #[test]
    fn test_monthly_grid_over_five_years() {
        let t = project(&breach_only(), &StateVector::default(), 60.0, 1.0, &ProjectionConfig::default())
            .unwrap();
        assert_eq!(t.len(), 60);
        for (i, p) in t.points.iter().enumerate() {
            assert_eq!(p.timestamp, i as f64);
            assert!(p.confidence_lower <= p.mean() && p.mean() <= p.confidence_upper);
        }
    }

    #[test]
    fn test_breach_shock_lands_in_first_step() {
        let config = ProjectionConfig::default();
        let t = project(&breach_only(), &StateVector::default(), 12.0, 1.0, &config).unwrap();
        let expected = 0.7 + config.sensitivity(Domain::Economic, StateField::PrimaryOutcome) * 0.92;
        assert!((t.points[0].state.primary_outcome - expected).abs() < 1e-12);
        assert_eq!(t.points[0].wave_index, Some(0));
        // Recovers monotonically toward the baseline afterwards.
        let primary = t.primary_series();
        assert!(primary.windows(2).all(|w| w[1] >= w[0]));
        assert!(primary[11] < 0.7);
    }

    #[test]
    fn test_projection_is_bit_reproducible() {
        let cascade = breach_only();
        let a = project(&cascade, &StateVector::default(), 24.0, 0.5, &ProjectionConfig::default()).unwrap();
        let b = project(&cascade, &StateVector::default(), 24.0, 0.5, &ProjectionConfig::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn test_degenerate_grids_rejected() {
        let cascade = breach_only();
        let s = StateVector::default();
        let c = ProjectionConfig::default();
        assert!(matches!(project(&cascade, &s, 12.0, 0.0, &c), Err(EngineError::InvalidConfig(_))));
        assert!(matches!(project(&cascade, &s, 12.0, -1.0, &c), Err(EngineError::InvalidConfig(_))));
        assert!(matches!(project(&cascade, &s, 0.2, 1.0, &c), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_finite_sensitivity_diverges() {
        let mut config = ProjectionConfig::default();
        config.sensitivity[Domain::Economic.index()][StateField::SocialCohesion.index()] = f64::NAN;
        let err = project(&breach_only(), &StateVector::default(), 12.0, 1.0, &config).unwrap_err();
        assert_eq!(
            err,
            EngineError::SimulationDivergence {
                stage: Stage::Projection,
                step: 0,
                field: StateField::SocialCohesion,
                run: None,
            }
        );
    }

    #[test]
    fn test_injected_shock_only_changes_the_future() {
        let config = ProjectionConfig::default();
        let base = project(&breach_only(), &StateVector::default(), 24.0, 1.0, &config).unwrap();
        let mut shocked = base.clone();
        shocked.schedule.inject(12, Domain::Military, 2.0).unwrap();
        let mut shocked = reproject(&shocked, &config).unwrap();
        assert_eq!(base.points[..12], shocked.points[..12]);
        assert!(shocked.points[12].mean() < base.points[12].mean());
        assert!(shocked.schedule.inject(24, Domain::Military, 1.0).is_err());
    }

    #[test]
    fn test_full_mitigation_branch_removes_the_shock() {
        let config = ProjectionConfig::default();
        let base = project(&breach_only(), &StateVector::default(), 12.0, 1.0, &config).unwrap();
        let b = branch(&base, &decision_at(0), &pathway(InterventionKind::Mitigation, 0.0), &config).unwrap();
        assert!(b.points.iter().all(|p| p.state == StateVector::default()));
        assert_eq!(b.branch_origin.as_ref().map(|o| o.decision_index), Some(0));
    }

    #[test]
    fn test_branch_shares_prefix_with_baseline() {
        let config = ProjectionConfig::default();
        let mut base = project(&breach_only(), &StateVector::default(), 24.0, 1.0, &config).unwrap();
        base.schedule.inject(8, Domain::Political, 1.0).unwrap();
        let base = reproject(&base, &config).unwrap();
        let b = branch(&base, &decision_at(6), &pathway(InterventionKind::Acceleration, 1.5), &config).unwrap();
        assert_eq!(b.points[..6], base.points[..6]);
        assert!(b.points[8].mean() < base.points[8].mean());
        assert!(branch(&base, &decision_at(24), &pathway(InterventionKind::Mitigation, 0.5), &config).is_err());
    }

    #[test]
    fn test_cumulative_totals() {
        let mut s = ShockSchedule::empty(4, 1.0);
        s.inject(0, Domain::Social, 0.5).unwrap();
        s.inject(2, Domain::Social, 0.25).unwrap();
        assert_eq!(s.cumulative(1)[Domain::Social.index()], 0.5);
        assert_eq!(s.cumulative(10)[Domain::Social.index()], 0.75);
        assert_eq!(s.step_of(3.99), Some(3));
        assert_eq!(s.step_of(4.0), None);
    }
}
