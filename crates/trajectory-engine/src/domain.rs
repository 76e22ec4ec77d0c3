//! # Domain tags and state vectors
//!
//! Table of Contents:
//! 1. Domain — Fixed set of node domain tags
//! 2. StateField — The six named outcome fields
//! 3. StateVector — One multivariate observation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Number of domain tags.
pub const DOMAIN_COUNT: usize = 7;

/// Number of state vector fields.
pub const FIELD_COUNT: usize = 6;

// ─────────────────────────────────────────────
// 1. Domain
// ─────────────────────────────────────────────

/// Domain tag of a dependency-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Economic,
    Political,
    Military,
    Social,
    Technological,
    Environmental,
    Informational,
}

impl Domain {
    /// All domains in table order.
    pub const ALL: [Domain; DOMAIN_COUNT] = [
        Domain::Economic,
        Domain::Political,
        Domain::Military,
        Domain::Social,
        Domain::Technological,
        Domain::Environmental,
        Domain::Informational,
    ];

    /// Row/column index into the configuration tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Domain> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Economic => "economic",
            Self::Political => "political",
            Self::Military => "military",
            Self::Social => "social",
            Self::Technological => "technological",
            Self::Environmental => "environmental",
            Self::Informational => "informational",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == tag)
            .ok_or_else(|| EngineError::InvalidGraph(format!("malformed domain tag '{s}'")))
    }
}

// ─────────────────────────────────────────────
// 2. StateField
// ─────────────────────────────────────────────

/// Named field of a [`StateVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    /// Headline metric the trajectory is reported on
    PrimaryOutcome,
    /// Signed economic impact, in [-1, 1]
    EconomicImpact,
    StabilityIndex,
    ResourceLevel,
    OperationalCapability,
    SocialCohesion,
}

impl StateField {
    pub const ALL: [StateField; FIELD_COUNT] = [
        StateField::PrimaryOutcome,
        StateField::EconomicImpact,
        StateField::StabilityIndex,
        StateField::ResourceLevel,
        StateField::OperationalCapability,
        StateField::SocialCohesion,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<StateField> {
        Self::ALL.get(index).copied()
    }

    /// Conceptual (min, max) range of the field.
    pub fn bounds(self) -> (f64, f64) {
        match self {
            Self::EconomicImpact => (-1.0, 1.0),
            _ => (0.0, 1.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryOutcome => "primary_outcome",
            Self::EconomicImpact => "economic_impact",
            Self::StabilityIndex => "stability_index",
            Self::ResourceLevel => "resource_level",
            Self::OperationalCapability => "operational_capability",
            Self::SocialCohesion => "social_cohesion",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field bounds in field-index order, for the stepping kernel.
pub(crate) const FIELD_BOUNDS: [(f64, f64); FIELD_COUNT] = [
    (0.0, 1.0),
    (-1.0, 1.0),
    (0.0, 1.0),
    (0.0, 1.0),
    (0.0, 1.0),
    (0.0, 1.0),
];

// ─────────────────────────────────────────────
// 3. StateVector
// ─────────────────────────────────────────────

/// Six-field snapshot of the modelled system.
///
/// Fields are always finite. A non-finite value produced while stepping is
/// reported as [`EngineError::SimulationDivergence`] and never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub primary_outcome: f64,
    pub economic_impact: f64,
    pub stability_index: f64,
    pub resource_level: f64,
    pub operational_capability: f64,
    pub social_cohesion: f64,
}

impl Default for StateVector {
    /// Pre-shock reference state.
    fn default() -> Self {
        Self {
            primary_outcome: 0.7,
            economic_impact: 0.0,
            stability_index: 0.8,
            resource_level: 0.8,
            operational_capability: 0.8,
            social_cohesion: 0.75,
        }
    }
}

impl StateVector {
    pub fn from_array(values: [f64; FIELD_COUNT]) -> Self {
        Self {
            primary_outcome: values[0],
            economic_impact: values[1],
            stability_index: values[2],
            resource_level: values[3],
            operational_capability: values[4],
            social_cohesion: values[5],
        }
    }

    pub fn to_array(&self) -> [f64; FIELD_COUNT] {
        [
            self.primary_outcome,
            self.economic_impact,
            self.stability_index,
            self.resource_level,
            self.operational_capability,
            self.social_cohesion,
        ]
    }

    pub fn get(&self, field: StateField) -> f64 {
        match field {
            StateField::PrimaryOutcome => self.primary_outcome,
            StateField::EconomicImpact => self.economic_impact,
            StateField::StabilityIndex => self.stability_index,
            StateField::ResourceLevel => self.resource_level,
            StateField::OperationalCapability => self.operational_capability,
            StateField::SocialCohesion => self.social_cohesion,
        }
    }

    /// First non-finite field, if any.
    pub fn first_non_finite(&self) -> Option<StateField> {
        StateField::ALL
            .iter()
            .copied()
            .find(|&f| !self.get(f).is_finite())
    }

    /// Whether every field is finite and inside its conceptual range.
    pub fn is_within_bounds(&self) -> bool {
        StateField::ALL.iter().all(|&f| {
            let (lo, hi) = f.bounds();
            let v = self.get(f);
            v.is_finite() && v >= lo && v <= hi
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_parse_is_case_insensitive() {
        assert_eq!("Economic".parse::<Domain>().unwrap(), Domain::Economic);
        assert_eq!(" informational ".parse::<Domain>().unwrap(), Domain::Informational);
    }

    #[test]
    fn test_malformed_domain_is_invalid_graph() {
        let err = "financial".parse::<Domain>().unwrap_err();
        assert!(matches!(err, EngineError::InvalidGraph(_)));
    }

    #[test]
    fn test_indices_round_trip() {
        for (i, d) in Domain::ALL.iter().enumerate() {
            assert_eq!(d.index(), i);
            assert_eq!(Domain::from_index(i), Some(*d));
        }
        for (i, f) in StateField::ALL.iter().enumerate() {
            assert_eq!(f.index(), i);
            assert_eq!(FIELD_BOUNDS[i], f.bounds());
        }
    }

    #[test]
    fn test_state_vector_array_order_matches_fields() {
        let s = StateVector::from_array([0.1, -0.2, 0.3, 0.4, 0.5, 0.6]);
        for f in StateField::ALL {
            assert_eq!(s.get(f), s.to_array()[f.index()]);
        }
        assert!(s.is_within_bounds());
    }

    #[test]
    fn test_first_non_finite() {
        let mut s = StateVector::default();
        assert_eq!(s.first_non_finite(), None);
        s.resource_level = f64::NAN;
        assert_eq!(s.first_non_finite(), Some(StateField::ResourceLevel));
    }
}
