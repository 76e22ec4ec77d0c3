//! Stepping kernel and sampling primitives shared by projection, Monte Carlo
//! and decision re-simulation.
//!
//! ## Table of Contents
//! 1. StepKernel - One allocation-free state update per time step
//! 2. derive_seed - Per-stream seed derivation (blake3)
//! 3. Gaussian - Box-Muller normal sampler with a cached spare

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ProjectionConfig;
use crate::domain::{StateField, StateVector, DOMAIN_COUNT, FIELD_BOUNDS, FIELD_COUNT};

// ============================================================================
// 1. StepKernel
// ============================================================================

/// Flat, copyable form of the projection parameters for the hot loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepKernel {
    sensitivity: [[f64; FIELD_COUNT]; DOMAIN_COUNT],
    retention: f64,
    baseline: [f64; FIELD_COUNT],
}

impl StepKernel {
    pub(crate) fn new(config: &ProjectionConfig, baseline: &StateVector, granularity: f64) -> Self {
        Self {
            sensitivity: config.sensitivity,
            retention: config.retention(granularity),
            baseline: baseline.to_array(),
        }
    }

    /// Apply one step of domain shocks, then pull back toward baseline.
    ///
    /// Returns the first field that became non-finite. Finite values are
    /// saturated to the field's range afterwards.
    #[inline]
    pub(crate) fn advance(
        &self,
        state: &mut [f64; FIELD_COUNT],
        shocks: &[f64; DOMAIN_COUNT],
    ) -> Result<(), StateField> {
        for f in 0..FIELD_COUNT {
            let mut delta = 0.0;
            for d in 0..DOMAIN_COUNT {
                // Quiet domains contribute nothing, whatever their sensitivity.
                if shocks[d] != 0.0 {
                    delta += self.sensitivity[d][f] * shocks[d];
                }
            }
            let shocked = state[f] + delta;
            let next = self.baseline[f] + (shocked - self.baseline[f]) * self.retention;
            if !next.is_finite() {
                return Err(StateField::ALL[f]);
            }
            let (lo, hi) = FIELD_BOUNDS[f];
            state[f] = next.clamp(lo, hi);
        }
        Ok(())
    }
}

// ============================================================================
// 2. derive_seed
// ============================================================================

/// Independent seed for stream `index` under `base`, namespaced by `tag`.
///
/// Seeds depend only on their inputs, never on which thread draws them.
pub(crate) fn derive_seed(base: u64, tag: &[u8], index: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&base.to_le_bytes());
    hasher.update(tag);
    hasher.update(&index.to_le_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn stream_rng(base: u64, tag: &[u8], index: u64) -> StdRng {
    StdRng::seed_from_u64(derive_seed(base, tag, index))
}

// ============================================================================
// 3. Gaussian
// ============================================================================

/// Standard normal sampler (Box-Muller, both outputs used).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Gaussian {
    spare: Option<f64>,
}

impl Gaussian {
    #[inline]
    pub(crate) fn sample<R: Rng>(&mut self, rng: &mut R) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        // u1 in (0, 1] keeps ln finite
        let u1 = 1.0 - rng.gen::<f64>();
        let u2 = rng.gen::<f64>();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = std::f64::consts::TAU * u2;
        self.spare = Some(r * theta.sin());
        r * theta.cos()
    }
}
