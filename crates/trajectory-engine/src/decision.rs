//! # Decision Point Detection
//!
//! Finds the indices where near-future outcomes spread out the most.
//!
//! Table of Contents:
//! 1. InterventionKind / AlternativePathway — Closed set of actions
//! 2. DecisionPoint — Scored bifurcation
//! 3. detect_decisions — Future-path variance scan and ranking
//!
//! Future-path variance at index `i` is measured by re-simulating steps
//! `i..i + lookahead_window` from the deterministic state just before `i`,
//! once per resample, with every shock in the window scaled by an impact
//! modifier `max(0, 1 + modifier_spread * z)`. A resample's terminal outcome
//! is the window average of the primary metric. The same modifiers are used
//! at every index so that variance curves are comparable across indices.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{DetectorConfig, DomainTables, ProjectionConfig};
use crate::domain::{Domain, StateField, StateVector, DOMAIN_COUNT};
use crate::error::{EngineError, Result, Stage};
use crate::kernel::{stream_rng, Gaussian, StepKernel};
use crate::projection::{step_states, ShockSchedule};
use crate::trajectory::Trajectory;

// ─────────────────────────────────────────────
// 1. InterventionKind / AlternativePathway
// ─────────────────────────────────────────────

/// What an alternative pathway does to the shocks it covers.
///
/// The pathway's `impact_modifier` is the parameter each kind applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterventionKind {
    /// Scale every domain's shock down
    Mitigation,
    /// Scale every domain's shock up (move faster through the disruption)
    Acceleration,
    /// Redirect a fraction of one domain's shock into another domain
    Deflection { from: Domain, to: Domain },
    /// Scale a single domain's shock
    Containment { domain: Domain },
}

impl InterventionKind {
    /// Rewrite one step's shocks in place.
    #[inline]
    pub fn apply(&self, shocks: &mut [f64; DOMAIN_COUNT], modifier: f64) {
        match *self {
            Self::Mitigation | Self::Acceleration => {
                for s in shocks.iter_mut() {
                    *s *= modifier;
                }
            }
            Self::Deflection { from, to } => {
                let moved = shocks[from.index()] * modifier;
                shocks[from.index()] -= moved;
                shocks[to.index()] += moved;
            }
            Self::Containment { domain } => shocks[domain.index()] *= modifier,
        }
    }

    /// Relative weight used when splitting probability across pathways.
    fn prior(&self) -> f64 {
        match self {
            Self::Mitigation => 0.4,
            Self::Containment { .. } => 0.3,
            Self::Deflection { .. } => 0.2,
            Self::Acceleration => 0.1,
        }
    }

    /// Rough relative cost in [0, 1].
    fn cost(&self) -> f64 {
        match self {
            Self::Mitigation => 0.5,
            Self::Containment { .. } => 0.7,
            Self::Deflection { .. } => 0.6,
            Self::Acceleration => 0.2,
        }
    }
}

/// One option available at a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativePathway {
    pub label: String,
    pub kind: InterventionKind,
    pub impact_modifier: f64,
    pub probability: f64,
    pub cost: f64,
}

impl AlternativePathway {
    fn new(kind: InterventionKind, impact_modifier: f64, label: String) -> Self {
        Self {
            label,
            kind,
            impact_modifier,
            probability: kind.prior(),
            cost: kind.cost(),
        }
    }
}

/// Pathways offered given the per-domain shock totals seen so far.
fn alternative_pathways(totals: &[f64; DOMAIN_COUNT], projection: &ProjectionConfig) -> Vec<AlternativePathway> {
    let active: Vec<Domain> = Domain::ALL
        .into_iter()
        .filter(|d| totals[d.index()] > 0.0)
        .collect();
    let dominant = active
        .iter()
        .copied()
        .fold(None::<Domain>, |best, d| match best {
            Some(b) if totals[b.index()] >= totals[d.index()] => Some(b),
            _ => Some(d),
        });

    let mut pathways = vec![AlternativePathway::new(
        InterventionKind::Mitigation,
        0.5,
        "Mitigate shock intensity across all domains".into(),
    )];
    if let Some(dominant) = dominant {
        pathways.push(AlternativePathway::new(
            InterventionKind::Containment { domain: dominant },
            0.2,
            format!("Contain {dominant} spillover"),
        ));
        let primary_sensitivity =
            |d: Domain| projection.sensitivity(d, StateField::PrimaryOutcome).abs();
        let target = active
            .iter()
            .copied()
            .filter(|d| *d != dominant)
            .fold(None::<Domain>, |best, d| match best {
                Some(b) if primary_sensitivity(b) <= primary_sensitivity(d) => Some(b),
                _ => Some(d),
            });
        if let Some(to) = target {
            pathways.push(AlternativePathway::new(
                InterventionKind::Deflection { from: dominant, to },
                0.8,
                format!("Deflect {dominant} pressure into {to}"),
            ));
        }
    }
    pathways.push(AlternativePathway::new(
        InterventionKind::Acceleration,
        1.5,
        "Accelerate through the disruption".into(),
    ));

    let total: f64 = pathways.iter().map(|p| p.probability).sum();
    for p in pathways.iter_mut() {
        p.probability /= total;
    }
    pathways
}

// ─────────────────────────────────────────────
// 2. DecisionPoint
// ─────────────────────────────────────────────

/// A trajectory index where alternative futures diverge.
///
/// All scores lie in [0, 1] and
/// `criticality = impact_score * reversibility_score * time_sensitivity_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPoint {
    pub index: usize,
    pub timestamp: f64,
    pub criticality: f64,
    /// Future-path variance normalized by the largest variance on the trajectory
    pub impact_score: f64,
    /// Lower deep into the cascade and in slow-to-reverse domains
    pub reversibility_score: f64,
    /// `1 / (timestamp + 1)`
    pub time_sensitivity_score: f64,
    pub future_path_variance: f64,
    pub pathways: Vec<AlternativePathway>,
    /// Time until future-path variance collapses past this index
    pub intervention_window: f64,
}

// ─────────────────────────────────────────────
// 3. detect_decisions
// ─────────────────────────────────────────────

/// Impact modifiers shared by every candidate index.
fn resample_modifiers(config: &DetectorConfig) -> Vec<f64> {
    (0..config.resample_count)
        .map(|k| {
            let mut rng = stream_rng(config.seed, b"resimulation", k as u64);
            let z = Gaussian::default().sample(&mut rng);
            (1.0 + config.modifier_spread * z).max(0.0)
        })
        .collect()
}

fn future_path_variance(
    kernel: &StepKernel,
    schedule: &ShockSchedule,
    start: &StateVector,
    index: usize,
    window: usize,
    modifiers: &[f64],
) -> Result<f64> {
    let end = (index + window).min(schedule.steps());
    let span = (end - index) as f64;
    let mut terminals = Vec::with_capacity(modifiers.len());
    for (k, &m) in modifiers.iter().enumerate() {
        let mut state = start.to_array();
        let mut acc = 0.0;
        for step in index..end {
            let mut shocks = schedule.row(step);
            for s in shocks.iter_mut() {
                *s *= m;
            }
            kernel
                .advance(&mut state, &shocks)
                .map_err(|field| EngineError::SimulationDivergence {
                    stage: Stage::Resimulation,
                    step,
                    field,
                    run: Some(k as u64),
                })?;
            acc += state[StateField::PrimaryOutcome.index()];
        }
        terminals.push(acc / span);
    }
    let n = terminals.len() as f64;
    let mean = terminals.iter().sum::<f64>() / n;
    let ss: f64 = terminals.iter().map(|t| (t - mean) * (t - mean)).sum();
    Ok(ss / (n - 1.0))
}

/// Scan every index for future-path variance and keep the most critical.
///
/// Returns at most `max_points` decision points ordered by descending
/// criticality. An empty list is a valid result.
pub fn detect_decisions(
    trajectory: &Trajectory,
    config: &DetectorConfig,
    projection: &ProjectionConfig,
    tables: &DomainTables,
) -> Result<Vec<DecisionPoint>> {
    config.validate()?;
    projection.validate()?;
    tables.validate()?;
    let schedule = &trajectory.schedule;
    let steps = schedule.steps();
    if steps == 0 {
        return Ok(Vec::new());
    }

    let granularity = trajectory.granularity;
    let kernel = StepKernel::new(projection, &trajectory.initial_state, granularity);
    let baseline = step_states(
        &kernel,
        schedule,
        &trajectory.initial_state,
        Stage::Resimulation,
    )?;
    let modifiers = resample_modifiers(config);

    let variances = (0..steps)
        .into_par_iter()
        .map(|i| {
            let start = if i == 0 { trajectory.initial_state } else { baseline[i - 1] };
            future_path_variance(&kernel, schedule, &start, i, config.lookahead_window, &modifiers)
        })
        .collect::<Result<Vec<f64>>>()?;

    let max_variance = variances.iter().copied().fold(0.0, f64::max);
    let depth = trajectory.cascade.depth;

    let mut points: Vec<DecisionPoint> = (0..steps)
        .filter(|&i| {
            let v = variances[i];
            v > config.variance_threshold
                && (i == 0 || v >= variances[i - 1])
                && (i + 1 == steps || v > variances[i + 1])
        })
        .map(|i| {
            let v = variances[i];
            let timestamp = i as f64 * granularity;
            let impact_score = (v / max_variance).clamp(0.0, 1.0);

            let totals = schedule.cumulative(i);
            let wave = trajectory
                .points
                .get(i)
                .and_then(|p| p.wave_index)
                .unwrap_or(0);
            let depth_fraction = if depth > 0 {
                (wave as f64 / depth as f64).min(1.0)
            } else {
                0.0
            };
            let domain_reversibility = Domain::ALL
                .into_iter()
                .filter(|d| totals[d.index()] > 0.0)
                .fold(None::<Domain>, |best, d| match best {
                    Some(b) if totals[b.index()] >= totals[d.index()] => Some(b),
                    _ => Some(d),
                })
                .map(|d| tables.reversibility(d))
                .unwrap_or(1.0);
            let reversibility_score = domain_reversibility * (1.0 - 0.5 * depth_fraction);
            let time_sensitivity_score = 1.0 / (timestamp + 1.0);

            let intervention_window = ((i + 1)..steps)
                .find(|&j| variances[j] < config.collapse_fraction * v)
                .map(|j| (j - i) as f64 * granularity)
                .unwrap_or(trajectory.horizon - timestamp);

            DecisionPoint {
                index: i,
                timestamp,
                criticality: impact_score * reversibility_score * time_sensitivity_score,
                impact_score,
                reversibility_score,
                time_sensitivity_score,
                future_path_variance: v,
                pathways: alternative_pathways(&totals, projection),
                intervention_window,
            }
        })
        .collect();

    let candidates = points.len();
    points.sort_by(|a, b| {
        b.criticality
            .total_cmp(&a.criticality)
            .then_with(|| a.index.cmp(&b.index))
    });
    points.truncate(config.max_points);

    tracing::debug!(
        candidates,
        kept = points.len(),
        max_variance,
        "Decision points detected"
    );

    Ok(points)
}
