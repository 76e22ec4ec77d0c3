//! # Inflection Point Detection
//!
//! Table of Contents:
//! 1. InflectionKind / InflectionPoint
//! 2. detect_inflections — Derivative sign changes and threshold crossings
//!
//! Slopes are backward differences per unit time: `s[i] = (x[i] - x[i-1]) / g`.
//! Curvature at point `i` is `a[i] = (s[i+1] - s[i]) / g`. A sign change of
//! `a` marks an acceleration or deceleration, a sign change of `s` marks a
//! reversal. Exact zeros carry no sign, so flat (saturated) stretches never
//! trigger events on their own.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::InflectionConfig;
use crate::domain::StateField;
use crate::error::Result;
use crate::trajectory::Trajectory;

// ─────────────────────────────────────────────
// 1. Types
// ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InflectionKind {
    /// Curvature turned positive
    Acceleration,
    /// Curvature turned negative
    Deceleration,
    /// Slope changed sign; `peak` when it went from rising to falling
    Reversal { peak: bool },
    /// Field crossed a configured critical level
    ThresholdCrossing { level: f64, rising: bool },
}

impl fmt::Display for InflectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceleration => write!(f, "acceleration"),
            Self::Deceleration => write!(f, "deceleration"),
            Self::Reversal { peak: true } => write!(f, "peak"),
            Self::Reversal { peak: false } => write!(f, "trough"),
            Self::ThresholdCrossing { level, rising: true } => write!(f, "rise above {level}"),
            Self::ThresholdCrossing { level, rising: false } => write!(f, "drop below {level}"),
        }
    }
}

/// A point where the trend changes character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InflectionPoint {
    pub index: usize,
    pub timestamp: f64,
    pub field: StateField,
    pub kind: InflectionKind,
    /// Size of the derivative change (distance past the level for crossings)
    pub magnitude: f64,
    pub pre_slope: f64,
    pub post_slope: f64,
    /// Human-readable trigger, naming coincident cascade activity
    pub description: String,
}

// ─────────────────────────────────────────────
// 2. detect_inflections
// ─────────────────────────────────────────────

fn opposite_signs(a: f64, b: f64) -> bool {
    (a > 0.0 && b < 0.0) || (a < 0.0 && b > 0.0)
}

/// Average slope over up to `window` steps before and after `index`.
fn trend_slopes(series: &[f64], index: usize, window: usize, granularity: f64) -> (f64, f64) {
    let lo = index.saturating_sub(window);
    let hi = (index + window).min(series.len() - 1);
    let pre = if index > lo {
        (series[index] - series[lo]) / ((index - lo) as f64 * granularity)
    } else {
        0.0
    };
    let post = if hi > index {
        (series[hi] - series[index]) / ((hi - index) as f64 * granularity)
    } else {
        0.0
    };
    (pre, post)
}

/// Cascade activity coinciding with the step at `index`.
fn cascade_context(trajectory: &Trajectory, index: usize) -> String {
    let g = trajectory.granularity;
    let from = index as f64 * g;
    let mut landed: Vec<String> = trajectory
        .cascade
        .activations_between(from, from + g)
        .map(|a| format!("wave {} {}", a.wave_index, a.domain))
        .collect();
    landed.dedup();
    if !landed.is_empty() {
        return format!("coincides with {}", landed.join(", "));
    }
    match trajectory.points.get(index).and_then(|p| p.wave_index) {
        Some(w) => format!("after cascade wave {w}"),
        None => "before any cascade activity".to_string(),
    }
}

/// Find derivative sign changes on `config.fields` and threshold crossings
/// on every configured threshold.
///
/// Results are ordered by index; an empty list is a valid result.
pub fn detect_inflections(trajectory: &Trajectory, config: &InflectionConfig) -> Result<Vec<InflectionPoint>> {
    config.validate()?;
    let n = trajectory.len();
    let g = trajectory.granularity;
    let mut found: Vec<(usize, StateField, InflectionKind, f64)> = Vec::new();

    if n >= 3 {
        for &field in &config.fields {
            let x = trajectory.field_series(field);
            // slope[i] is the backward difference ending at point i; slope[0] unused
            let slope: Vec<f64> = (0..n)
                .map(|i| if i == 0 { 0.0 } else { (x[i] - x[i - 1]) / g })
                .collect();

            for i in 1..n - 1 {
                let (before, after) = (slope[i], slope[i + 1]);
                let change = (after - before).abs();
                if opposite_signs(before, after) && change >= config.slope_threshold {
                    found.push((i, field, InflectionKind::Reversal { peak: before > 0.0 }, change));
                }
            }

            let curvature: Vec<f64> = (1..n - 1).map(|i| (slope[i + 1] - slope[i]) / g).collect();
            for (k, pair) in curvature.windows(2).enumerate() {
                let change = (pair[1] - pair[0]).abs();
                if opposite_signs(pair[0], pair[1]) && change >= config.second_derivative_threshold {
                    let kind = if pair[1] > 0.0 {
                        InflectionKind::Acceleration
                    } else {
                        InflectionKind::Deceleration
                    };
                    // curvature[k] sits at point k + 1
                    found.push((k + 2, field, kind, change));
                }
            }
        }
    }

    for threshold in &config.thresholds {
        let x = trajectory.field_series(threshold.field);
        let mut prev = trajectory.initial_state.get(threshold.field);
        for (i, &cur) in x.iter().enumerate() {
            let rising = prev < threshold.level && cur >= threshold.level;
            let falling = prev >= threshold.level && cur < threshold.level;
            if rising || falling {
                let kind = InflectionKind::ThresholdCrossing { level: threshold.level, rising };
                found.push((i, threshold.field, kind, (cur - threshold.level).abs()));
            }
            prev = cur;
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.index().cmp(&b.1.index())));

    let points = found
        .into_iter()
        .map(|(index, field, kind, magnitude)| {
            let series = trajectory.field_series(field);
            let (pre_slope, post_slope) = trend_slopes(&series, index, config.slope_window, g);
            let timestamp = index as f64 * g;
            InflectionPoint {
                index,
                timestamp,
                field,
                kind,
                magnitude,
                pre_slope,
                post_slope,
                description: format!(
                    "{kind} in {field} at t={timestamp}; {}",
                    cascade_context(trajectory, index)
                ),
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(count = points.len(), "Inflection points detected");
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::CascadeResult;
    use crate::config::{FieldThreshold, ProjectionConfig};
    use crate::domain::{Domain, StateVector};
    use crate::projection::{project, reproject};
    use crate::trajectory::TrajectoryPoint;

    fn from_series(values: &[f64]) -> Trajectory {
        let mut t = project(
            &CascadeResult::default(),
            &StateVector::default(),
            values.len() as f64,
            1.0,
            &ProjectionConfig::default(),
        )
        .unwrap();
        t.initial_state.primary_outcome = values[0];
        t.points = values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let state = StateVector { primary_outcome: v, ..StateVector::default() };
                TrajectoryPoint::point_estimate(i as f64, state, None)
            })
            .collect();
        t
    }

    fn only_derivatives() -> InflectionConfig {
        InflectionConfig { thresholds: Vec::new(), ..InflectionConfig::default() }
    }

    #[test]
    fn test_peak_reversal() {
        let t = from_series(&[0.1, 0.3, 0.5, 0.4, 0.3]);
        let points = detect_inflections(&t, &only_derivatives()).unwrap();
        let peak = points
            .iter()
            .find(|p| matches!(p.kind, InflectionKind::Reversal { .. }))
            .unwrap();
        assert_eq!(peak.index, 2);
        assert_eq!(peak.kind, InflectionKind::Reversal { peak: true });
        assert!(peak.pre_slope > 0.0 && peak.post_slope < 0.0);
        assert!((peak.magnitude - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_curvature_sign_change() {
        // Slopes 0.1, 0.3, 0.4, 0.45, 0.3: curvature turns negative at point 4.
        let t = from_series(&[0.0, 0.1, 0.4, 0.8, 1.25, 1.55]);
        let points = detect_inflections(&t, &only_derivatives()).unwrap();
        assert!(points
            .iter()
            .any(|p| p.kind == InflectionKind::Deceleration && p.index == 4));
    }

    #[test]
    fn test_straight_line_has_no_events() {
        let t = from_series(&[0.2, 0.3, 0.4, 0.5, 0.6]);
        assert!(detect_inflections(&t, &only_derivatives()).unwrap().is_empty());
    }

    #[test]
    fn test_threshold_crossing_on_projected_shock() {
        let config = ProjectionConfig::default();
        let base = project(&CascadeResult::default(), &StateVector::default(), 24.0, 1.0, &config).unwrap();
        let mut shocked = base.clone();
        shocked.schedule.inject(6, Domain::Military, 3.0).unwrap();
        let shocked = reproject(&shocked, &config).unwrap();
        let inflection = InflectionConfig {
            thresholds: vec![FieldThreshold { field: StateField::PrimaryOutcome, level: 0.5 }],
            ..InflectionConfig::default()
        };
        let points = detect_inflections(&shocked, &inflection).unwrap();
        let drop = points
            .iter()
            .find(|p| matches!(p.kind, InflectionKind::ThresholdCrossing { rising: false, .. }))
            .unwrap();
        assert_eq!(drop.index, 6);
        assert!(points
            .iter()
            .any(|p| matches!(p.kind, InflectionKind::ThresholdCrossing { rising: true, .. })));
        assert!(drop.description.contains("primary_outcome"));
    }

    #[test]
    fn test_empty_trajectory_is_fine() {
        let mut t = from_series(&[0.5]);
        t.points.clear();
        assert!(detect_inflections(&t, &InflectionConfig::default()).unwrap().is_empty());
    }
}
