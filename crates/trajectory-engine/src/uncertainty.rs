//! # Uncertainty Engine
//!
//! Monte Carlo wrapper around the deterministic projection.
//!
//! Table of Contents:
//! 1. estimate — Budget check, parallel sampling, reduction
//! 2. Run sampling — Allocation-free inner loop over one chunk of runs
//! 3. Quantiles
//!
//! Each run multiplies every non-zero shock cell by `1 + noise_std * s_d * z`
//! (floored at zero) with `z ~ N(0, 1)` drawn from the run's own stream, then
//! re-steps the schedule. Runs are grouped in fixed-size chunks. Each chunk
//! writes its primary-outcome samples into its own slice of one preallocated
//! buffer and returns per-step field sums; chunk sums are reduced in chunk
//! order. The numeric result therefore does not depend on the thread count.

use std::time::Instant;

use rand::Rng;
use rayon::prelude::*;

use crate::config::{ProjectionConfig, UncertaintyConfig};
use crate::domain::{StateVector, DOMAIN_COUNT, FIELD_COUNT};
use crate::error::{EngineError, Result, Stage};
use crate::kernel::{stream_rng, Gaussian, StepKernel};
use crate::projection::ShockSchedule;
use crate::trajectory::{Trajectory, TrajectoryPoint, UncertaintySummary};

/// Runs per parallel work item.
const CHUNK_RUNS: usize = 256;

const STREAM_TAG: &[u8] = b"monte-carlo";

/// Bytes [`estimate`] allocates up front for `runs` runs over `steps` steps:
/// the sample buffer, one field-sum table per chunk and the reduced table.
pub(crate) fn working_set_bytes(runs: u64, steps: u64) -> u64 {
    let samples = runs.saturating_mul(steps);
    let sum_tables = runs.div_ceil(CHUNK_RUNS as u64).saturating_add(1);
    let sums = sum_tables
        .saturating_mul(steps)
        .saturating_mul(FIELD_COUNT as u64);
    samples
        .saturating_add(sums)
        .saturating_mul(std::mem::size_of::<f64>() as u64)
}

// ============================================================================
// 1. estimate
// ============================================================================

/// Fill in confidence bounds for `trajectory` by Monte Carlo sampling.
///
/// Point states become the per-step mean over all runs. Bounds on the
/// primary outcome are the empirical quantiles at the nominal level
/// `decay.level(t)`, widened if needed so that `lower <= mean <= upper`.
/// Identical seeds give bit-identical output on any thread pool.
pub fn estimate(
    trajectory: &Trajectory,
    projection: &ProjectionConfig,
    config: &UncertaintyConfig,
) -> Result<Trajectory> {
    projection.validate()?;
    config.validate()?;
    let steps = trajectory.schedule.steps();
    let runs = config.n_simulations;
    config.budget.check(working_set_bytes(runs, steps as u64))?;
    if steps == 0 {
        return Ok(trajectory.clone());
    }

    let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let kernel = StepKernel::new(projection, &trajectory.initial_state, trajectory.granularity);
    let started = Instant::now();

    let runs = runs as usize;
    let mut samples = vec![0.0f64; runs * steps];
    let sampler = ChunkSampler {
        kernel: &kernel,
        schedule: &trajectory.schedule,
        initial: trajectory.initial_state.to_array(),
        noise: noise_scales(config),
        seed,
        steps,
    };

    let partials = samples
        .par_chunks_mut(CHUNK_RUNS * steps)
        .enumerate()
        .map(|(chunk, buffer)| sampler.run_chunk(chunk * CHUNK_RUNS, buffer))
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let mut sums = vec![0.0f64; steps * FIELD_COUNT];
    for partial in &partials {
        for (total, value) in sums.iter_mut().zip(partial) {
            *total += value;
        }
    }

    let decay = config.decay;
    let horizon = trajectory.horizon;
    let samples = &samples;
    let bounds = (0..steps)
        .into_par_iter()
        .map(|step| {
            let mut column: Vec<f64> = (0..runs).map(|r| samples[r * steps + step]).collect();
            column.sort_unstable_by(f64::total_cmp);
            let level = decay.level(trajectory.points.get(step).map_or(0.0, |p| p.timestamp), horizon);
            let tail = (1.0 - level) / 2.0;
            (quantile(&column, tail), quantile(&column, 1.0 - tail), level)
        })
        .collect::<Vec<_>>();

    let n = runs as f64;
    let points = trajectory
        .points
        .iter()
        .enumerate()
        .map(|(step, point)| {
            let mut mean = [0.0; FIELD_COUNT];
            for (f, m) in mean.iter_mut().enumerate() {
                *m = sums[step * FIELD_COUNT + f] / n;
            }
            let state = StateVector::from_array(mean);
            let (lower, upper, level) = bounds[step];
            TrajectoryPoint {
                timestamp: point.timestamp,
                state,
                confidence_lower: lower.min(state.primary_outcome),
                confidence_upper: upper.max(state.primary_outcome),
                confidence_level: Some(level),
                wave_index: point.wave_index,
            }
        })
        .collect();

    tracing::info!(
        runs,
        steps,
        seed,
        noise_std = config.noise_std,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Monte Carlo bounds estimated"
    );

    Ok(Trajectory {
        points,
        uncertainty: Some(UncertaintySummary {
            n_simulations: config.n_simulations,
            noise_std: config.noise_std,
            seed,
            decay,
            lambda: decay.lambda(horizon),
        }),
        ..trajectory.clone()
    })
}

fn noise_scales(config: &UncertaintyConfig) -> [f64; DOMAIN_COUNT] {
    let mut scales = config.domain_noise_scale;
    for s in scales.iter_mut() {
        *s *= config.noise_std;
    }
    scales
}

// ============================================================================
// 2. Run sampling
// ============================================================================

struct ChunkSampler<'a> {
    kernel: &'a StepKernel,
    schedule: &'a ShockSchedule,
    initial: [f64; FIELD_COUNT],
    /// `noise_std * domain_noise_scale[d]`
    noise: [f64; DOMAIN_COUNT],
    seed: u64,
    steps: usize,
}

impl ChunkSampler<'_> {
    /// Simulate the runs backing `buffer` (one row of `steps` samples per run)
    /// and return their per-step field sums.
    fn run_chunk(&self, first_run: usize, buffer: &mut [f64]) -> Result<Vec<f64>> {
        let mut sums = vec![0.0f64; self.steps * FIELD_COUNT];
        for (offset, row) in buffer.chunks_exact_mut(self.steps).enumerate() {
            let run = (first_run + offset) as u64;
            let mut rng = stream_rng(self.seed, STREAM_TAG, run);
            let mut gaussian = Gaussian::default();
            let mut state = self.initial;

            for (step, sample) in row.iter_mut().enumerate() {
                let mut shocks = self.schedule.row(step);
                for (d, shock) in shocks.iter_mut().enumerate() {
                    if *shock != 0.0 {
                        let z = gaussian.sample(&mut rng);
                        *shock *= (1.0 + self.noise[d] * z).max(0.0);
                    }
                }
                self.kernel
                    .advance(&mut state, &shocks)
                    .map_err(|field| EngineError::SimulationDivergence {
                        stage: Stage::MonteCarlo,
                        step,
                        field,
                        run: Some(run),
                    })?;
                *sample = state[0];
                let base = step * FIELD_COUNT;
                for (f, value) in state.iter().enumerate() {
                    sums[base + f] += value;
                }
            }
        }
        Ok(sums)
    }
}

// ============================================================================
// 3. Quantiles
// ============================================================================

/// Linear-interpolated quantile of an ascending slice.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}
