//! # Engine Configuration
//!
//! Every table and threshold the engine reads is passed in explicitly through
//! these structs. Nothing is read from the environment or from disk; callers
//! that keep overrides in TOML hand the text to [`EngineConfig::from_toml_str`].
//!
//! ## Table of Contents
//! 1. DomainTables — Domain delays, domain-pair interaction weights, reversibility
//! 2. CascadeConfig / MagnitudeMerge — Propagation parameters
//! 3. ProjectionConfig — Domain→field sensitivity matrix and recovery rate
//! 4. UncertaintyConfig / ConfidenceDecay / ResourceBudget — Monte Carlo settings
//! 5. DetectorConfig / InflectionConfig / InterventionConfig — Analysis thresholds
//! 6. EngineConfig — Aggregate, TOML parsing, validation

use serde::{Deserialize, Serialize};

use crate::domain::{Domain, StateField, DOMAIN_COUNT, FIELD_COUNT};
use crate::error::{EngineError, Result};

fn check(cond: bool, msg: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(msg()))
    }
}

fn finite_non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

// ============================================================================
// 1. DomainTables
// ============================================================================

/// Domain lookup tables shared by the cascade simulator and the detector.
///
/// Rows and columns follow [`Domain::ALL`] order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainTables {
    /// Time for a shock to land in a node of the target domain
    pub delays: [f64; DOMAIN_COUNT],
    /// `interaction[source][target]` coupling multiplier
    pub interaction: [[f64; DOMAIN_COUNT]; DOMAIN_COUNT],
    /// How easily a shock dominated by this domain can be undone, in [0, 1]
    pub reversibility: [f64; DOMAIN_COUNT],
}

impl Default for DomainTables {
    fn default() -> Self {
        Self {
            // Months
            delays: [0.5, 1.0, 0.25, 2.0, 1.5, 3.0, 0.1],
            interaction: [
                // econ  pol   mil   soc   tech  env   info
                [1.00, 0.85, 0.40, 0.75, 0.60, 0.35, 0.50], // economic
                [0.70, 1.00, 0.70, 0.65, 0.40, 0.30, 0.60], // political
                [0.60, 0.90, 1.00, 0.70, 0.50, 0.55, 0.50], // military
                [0.55, 0.75, 0.35, 1.00, 0.30, 0.25, 0.70], // social
                [0.70, 0.35, 0.45, 0.45, 1.00, 0.40, 0.80], // technological
                [0.65, 0.50, 0.30, 0.60, 0.35, 1.00, 0.30], // environmental
                [0.50, 0.70, 0.30, 0.85, 0.50, 0.20, 1.00], // informational
            ],
            reversibility: [0.8, 0.6, 0.4, 0.5, 0.7, 0.3, 0.9],
        }
    }
}

impl DomainTables {
    /// Tables with every delay set to `delay` and every interaction set to 1.
    pub fn uniform(delay: f64) -> Self {
        Self {
            delays: [delay; DOMAIN_COUNT],
            interaction: [[1.0; DOMAIN_COUNT]; DOMAIN_COUNT],
            reversibility: [1.0; DOMAIN_COUNT],
        }
    }

    pub fn delay(&self, domain: Domain) -> f64 {
        self.delays[domain.index()]
    }

    pub fn interaction(&self, source: Domain, target: Domain) -> f64 {
        self.interaction[source.index()][target.index()]
    }

    pub fn reversibility(&self, domain: Domain) -> f64 {
        self.reversibility[domain.index()]
    }

    pub fn with_delay(mut self, domain: Domain, delay: f64) -> Self {
        self.delays[domain.index()] = delay;
        self
    }

    pub fn with_interaction(mut self, source: Domain, target: Domain, weight: f64) -> Self {
        self.interaction[source.index()][target.index()] = weight;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for d in Domain::ALL {
            let delay = self.delay(d);
            check(finite_non_negative(delay), || {
                format!("delay for {d} must be finite and >= 0, got {delay}")
            })?;
            let rev = self.reversibility(d);
            check((0.0..=1.0).contains(&rev), || {
                format!("reversibility for {d} must be in [0, 1], got {rev}")
            })?;
            for t in Domain::ALL {
                let w = self.interaction(d, t);
                check(finite_non_negative(w), || {
                    format!("interaction weight {d}->{t} must be finite and >= 0, got {w}")
                })?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// 2. CascadeConfig
// ============================================================================

/// How magnitudes combine when a node is reached along several paths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MagnitudeMerge {
    /// Strongest incoming path wins
    Max,
    /// Incoming contributions add up, saturating at `cap`
    SumCapped { cap: f64 },
}

impl Default for MagnitudeMerge {
    fn default() -> Self {
        Self::Max
    }
}

/// Cascade propagation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Paths stop once their activation time passes this
    pub max_time: f64,
    /// Per-hop attenuation in (0, 1]
    pub dampening_factor: f64,
    /// Paths stop once their magnitude falls below this
    pub saturation_epsilon: f64,
    /// Multiply-reached node policy
    pub merge: MagnitudeMerge,
    /// Upper bound on magnitude inside reinforcing loops
    pub saturation_bound: f64,
    /// Longest cycle the feedback-loop pass looks for
    pub max_cycle_length: usize,
    /// Loop enumeration stops (with a warning) after this many cycles
    pub max_cycles: usize,
    /// Edge visits the loop search may spend before giving up (with a warning)
    pub max_loop_search_steps: usize,
    /// Hard cap on processed propagation events
    pub max_events: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_time: 60.0,
            dampening_factor: 0.7,
            saturation_epsilon: 1e-3,
            merge: MagnitudeMerge::Max,
            saturation_bound: 1.0,
            max_cycle_length: 8,
            max_cycles: 256,
            max_loop_search_steps: 2_000_000,
            max_events: 1_000_000,
        }
    }
}

impl CascadeConfig {
    pub fn validate(&self) -> Result<()> {
        check(finite_non_negative(self.max_time), || {
            format!("max_time must be finite and >= 0, got {}", self.max_time)
        })?;
        check(
            self.dampening_factor > 0.0 && self.dampening_factor <= 1.0,
            || format!("dampening_factor must be in (0, 1], got {}", self.dampening_factor),
        )?;
        check(
            self.saturation_epsilon.is_finite() && self.saturation_epsilon > 0.0,
            || format!("saturation_epsilon must be > 0, got {}", self.saturation_epsilon),
        )?;
        check(
            self.saturation_bound.is_finite() && self.saturation_bound >= 1.0,
            || format!("saturation_bound must be >= 1, got {}", self.saturation_bound),
        )?;
        if let MagnitudeMerge::SumCapped { cap } = self.merge {
            check(cap.is_finite() && cap >= 1.0, || {
                format!("sum-capped merge needs a cap >= 1, got {cap}")
            })?;
        }
        check(self.max_cycle_length >= 2, || {
            "max_cycle_length must be at least 2".into()
        })?;
        check(self.max_loop_search_steps > 0, || {
            "max_loop_search_steps must be positive".into()
        })?;
        check(self.max_events > 0, || "max_events must be positive".into())
    }
}

// ============================================================================
// 3. ProjectionConfig
// ============================================================================

/// Trajectory stepping parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// `sensitivity[domain][field]`: additive change per unit of domain shock
    pub sensitivity: [[f64; FIELD_COUNT]; DOMAIN_COUNT],
    /// Fraction of the gap to baseline closed per unit time, in [0, 1]
    pub recovery_rate: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            sensitivity: [
                // primary econ   stab   res    ops    social
                [-0.10, -0.30, -0.05, -0.15, -0.05, -0.05], // economic
                [-0.08, -0.05, -0.25, -0.02, -0.05, -0.10], // political
                [-0.12, -0.08, -0.20, -0.10, -0.30, -0.05], // military
                [-0.06, -0.03, -0.10, -0.02, -0.05, -0.30], // social
                [-0.07, -0.10, -0.03, -0.05, -0.20, -0.02], // technological
                [-0.05, -0.08, -0.05, -0.25, -0.08, -0.05], // environmental
                [-0.04, -0.02, -0.08, -0.01, -0.05, -0.15], // informational
            ],
            recovery_rate: 0.08,
        }
    }
}

impl ProjectionConfig {
    pub fn sensitivity(&self, domain: Domain, field: StateField) -> f64 {
        self.sensitivity[domain.index()][field.index()]
    }

    /// Fraction of the deviation from baseline that survives one step.
    pub fn retention(&self, granularity: f64) -> f64 {
        (1.0 - self.recovery_rate).powf(granularity)
    }

    pub fn validate(&self) -> Result<()> {
        check((0.0..=1.0).contains(&self.recovery_rate), || {
            format!("recovery_rate must be in [0, 1], got {}", self.recovery_rate)
        })
    }
}

// ============================================================================
// 4. UncertaintyConfig
// ============================================================================

/// Exponential decay of the nominal confidence level over the horizon.
///
/// `level(t) = floor + (start - floor) * exp(-λt)` with λ chosen so that the
/// remaining excess over the floor at the horizon is `residual * (start - floor)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceDecay {
    pub start_level: f64,
    pub floor_level: f64,
    pub residual: f64,
}

impl Default for ConfidenceDecay {
    fn default() -> Self {
        Self {
            start_level: 0.95,
            floor_level: 0.60,
            residual: 0.01,
        }
    }
}

impl ConfidenceDecay {
    /// Decay rate λ for a given horizon.
    pub fn lambda(&self, horizon: f64) -> f64 {
        if horizon <= 0.0 || self.start_level == self.floor_level {
            return 0.0;
        }
        -self.residual.ln() / horizon
    }

    /// Nominal confidence level at time `t`.
    pub fn level(&self, t: f64, horizon: f64) -> f64 {
        let lambda = self.lambda(horizon);
        self.floor_level + (self.start_level - self.floor_level) * (-lambda * t.max(0.0)).exp()
    }

    pub fn validate(&self) -> Result<()> {
        check(
            self.floor_level > 0.0
                && self.floor_level <= self.start_level
                && self.start_level < 1.0,
            || {
                format!(
                    "confidence levels must satisfy 0 < floor ({}) <= start ({}) < 1",
                    self.floor_level, self.start_level
                )
            },
        )?;
        check(self.residual > 0.0 && self.residual < 1.0, || {
            format!("decay residual must be in (0, 1), got {}", self.residual)
        })
    }
}

/// Memory ceiling for the Monte Carlo working set.
///
/// Covers what `estimate` allocates up front: the run-major sample buffer
/// and one per-step field-sum table per run chunk. The quantile pass also
/// sorts one `n_simulations`-long column per worker thread; that scratch is
/// not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    pub max_buffer_bytes: u64,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 512 * 1024 * 1024,
        }
    }
}

impl ResourceBudget {
    /// Fails fast when `requested` bytes would not fit the budget.
    pub fn check(&self, requested: u64) -> Result<()> {
        if requested > self.max_buffer_bytes {
            return Err(EngineError::ResourceBudgetExceeded {
                requested,
                limit: self.max_buffer_bytes,
            });
        }
        Ok(())
    }
}

/// Monte Carlo settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub n_simulations: u64,
    /// Std of the multiplicative Gaussian noise on shock magnitudes
    pub noise_std: f64,
    /// Base seed (None = drawn from the thread RNG and reported back)
    pub seed: Option<u64>,
    /// Per-domain noise scale applied on top of `noise_std`
    pub domain_noise_scale: [f64; DOMAIN_COUNT],
    pub decay: ConfidenceDecay,
    pub budget: ResourceBudget,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            n_simulations: 10_000,
            noise_std: 0.25,
            seed: None,
            domain_noise_scale: [1.0; DOMAIN_COUNT],
            decay: ConfidenceDecay::default(),
            budget: ResourceBudget::default(),
        }
    }
}

impl UncertaintyConfig {
    pub fn validate(&self) -> Result<()> {
        check(self.n_simulations > 0, || "n_simulations must be positive".into())?;
        check(finite_non_negative(self.noise_std), || {
            format!("noise_std must be finite and >= 0, got {}", self.noise_std)
        })?;
        check(self.domain_noise_scale.iter().all(|s| finite_non_negative(*s)), || {
            "domain_noise_scale entries must be finite and >= 0".into()
        })?;
        self.decay.validate()
    }
}

// ============================================================================
// 5. Analysis thresholds
// ============================================================================

/// Decision point detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Steps re-simulated after each candidate index
    pub lookahead_window: usize,
    /// Minimum future-path variance for a decision point
    pub variance_threshold: f64,
    /// Re-simulations per candidate
    pub resample_count: usize,
    /// Std of the impact modifier drawn per re-simulation
    pub modifier_spread: f64,
    /// Decision points kept after ranking (3..=7)
    pub max_points: usize,
    /// Variance fraction that marks the intervention window as closed
    pub collapse_fraction: f64,
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            lookahead_window: 6,
            variance_threshold: 1e-6,
            resample_count: 24,
            modifier_spread: 0.5,
            max_points: 5,
            collapse_fraction: 0.5,
            seed: 0x5eed,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        check(self.lookahead_window >= 1, || "lookahead_window must be >= 1".into())?;
        check(finite_non_negative(self.variance_threshold), || {
            format!("variance_threshold must be >= 0, got {}", self.variance_threshold)
        })?;
        check(self.resample_count >= 2, || "resample_count must be >= 2".into())?;
        check(finite_non_negative(self.modifier_spread), || {
            format!("modifier_spread must be >= 0, got {}", self.modifier_spread)
        })?;
        check((3..=7).contains(&self.max_points), || {
            format!("max_points must be in 3..=7, got {}", self.max_points)
        })?;
        check(
            self.collapse_fraction > 0.0 && self.collapse_fraction < 1.0,
            || format!("collapse_fraction must be in (0, 1), got {}", self.collapse_fraction),
        )
    }
}

/// A critical level on one state field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldThreshold {
    pub field: StateField,
    pub level: f64,
}

/// Inflection point detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InflectionConfig {
    /// Minimum |Δ second derivative| for an acceleration/deceleration event
    pub second_derivative_threshold: f64,
    /// Minimum |Δ first derivative| for a reversal
    pub slope_threshold: f64,
    /// Steps averaged for pre/post slopes
    pub slope_window: usize,
    /// Fields scanned for derivative events; the first is reported first
    pub fields: Vec<StateField>,
    /// Critical levels checked on every field listed
    pub thresholds: Vec<FieldThreshold>,
}

impl Default for InflectionConfig {
    fn default() -> Self {
        Self {
            second_derivative_threshold: 1e-4,
            slope_threshold: 1e-4,
            slope_window: 3,
            fields: vec![StateField::PrimaryOutcome],
            thresholds: vec![
                FieldThreshold { field: StateField::PrimaryOutcome, level: 0.5 },
                FieldThreshold { field: StateField::StabilityIndex, level: 0.5 },
            ],
        }
    }
}

impl InflectionConfig {
    pub fn validate(&self) -> Result<()> {
        check(finite_non_negative(self.second_derivative_threshold), || {
            "second_derivative_threshold must be >= 0".into()
        })?;
        check(finite_non_negative(self.slope_threshold), || {
            "slope_threshold must be >= 0".into()
        })?;
        check(self.slope_window >= 1, || "slope_window must be >= 1".into())
    }
}

/// Intervention evaluation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionConfig {
    /// Primary-outcome difference that counts as "the intervention has landed"
    pub impact_epsilon: f64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self { impact_epsilon: 1e-3 }
    }
}

impl InterventionConfig {
    pub fn validate(&self) -> Result<()> {
        check(finite_non_negative(self.impact_epsilon), || {
            format!("impact_epsilon must be finite and >= 0, got {}", self.impact_epsilon)
        })
    }
}

// ============================================================================
// 6. EngineConfig
// ============================================================================

/// Everything the pipeline needs besides the graph and the breach request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tables: DomainTables,
    pub cascade: CascadeConfig,
    pub projection: ProjectionConfig,
    pub uncertainty: UncertaintyConfig,
    pub detector: DetectorConfig,
    pub inflection: InflectionConfig,
    pub intervention: InterventionConfig,
}

impl EngineConfig {
    /// Parse a TOML document; omitted sections and keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.tables.validate()?;
        self.cascade.validate()?;
        self.projection.validate()?;
        self.uncertainty.validate()?;
        self.detector.validate()?;
        self.inflection.validate()?;
        self.intervention.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [cascade]
            dampening_factor = 0.5

            [cascade.merge]
            mode = "sum_capped"
            cap = 2.0

            [uncertainty]
            n_simulations = 2000
            seed = 7
        "#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.cascade.dampening_factor, 0.5);
        assert_eq!(config.cascade.merge, MagnitudeMerge::SumCapped { cap: 2.0 });
        assert_eq!(config.cascade.max_cycle_length, 8);
        assert_eq!(config.uncertainty.n_simulations, 2000);
        assert_eq!(config.uncertainty.seed, Some(7));
        assert_eq!(config.tables, DomainTables::default());
    }

    #[test]
    fn test_out_of_range_toml_rejected() {
        let err = EngineConfig::from_toml_str("[uncertainty.decay]\nstart_level = 0.5\nfloor_level = 0.8")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_table_overrides() {
        let tables = DomainTables::default()
            .with_delay(Domain::Social, 4.0)
            .with_interaction(Domain::Economic, Domain::Political, 0.95);
        assert_eq!(tables.delay(Domain::Social), 4.0);
        assert_eq!(tables.interaction(Domain::Economic, Domain::Political), 0.95);
        assert!(tables.clone().with_delay(Domain::Military, -1.0).validate().is_err());
    }

    #[test]
    fn test_decay_endpoints() {
        let decay = ConfidenceDecay::default();
        let horizon = 60.0;
        assert!((decay.level(0.0, horizon) - 0.95).abs() < 1e-12);
        let end = decay.level(horizon, horizon);
        let expected = 0.60 + 0.01 * (0.95 - 0.60);
        assert!((end - expected).abs() < 1e-12);
        let mut prev = f64::INFINITY;
        for i in 0..=60 {
            let l = decay.level(i as f64, horizon);
            assert!(l <= prev);
            prev = l;
        }
    }

    #[test]
    fn test_budget_fails_fast() {
        let budget = ResourceBudget { max_buffer_bytes: 1024 };
        assert!(budget.check(1024).is_ok());
        let err = budget.check(1025).unwrap_err();
        assert_eq!(err, EngineError::ResourceBudgetExceeded { requested: 1025, limit: 1024 });
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = EngineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }
}
