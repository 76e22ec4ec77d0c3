//! # Trajectory Engine
//!
//! Propagates a shock through a causal dependency graph, projects the
//! resulting multivariate outcome trajectory, bounds it with a parallel Monte
//! Carlo sampler under a decaying confidence level, and flags the decision
//! and inflection points that matter.
//!
//! ## Table of Contents
//!
//! - **graph**: Arena-indexed dependency graph and its serde input form
//! - **cascade**: Time-ordered wave propagation and feedback-loop detection
//! - **projection**: Shock schedule, deterministic projection, branching
//! - **uncertainty**: Monte Carlo bounds with confidence decay
//! - **decision** / **inflection**: Bifurcation and trend-change detection
//! - **intervention**: Re-projection under a chosen pathway
//! - **pipeline**: All stages for one breach request
//! - **config** / **error** / **domain**: Shared tables, errors, state types
//!
//! ## Example
//!
//! ```rust,ignore
//! use trajectory_engine::prelude::*;
//!
//! let graph = DependencyGraph::builder()
//!     .node("grid", Domain::Technological)
//!     .node("markets", Domain::Economic)
//!     .edge("grid", "markets", 0.9)
//!     .breach("grid")
//!     .build()?;
//!
//! let request = BreachRequest::monthly(60.0).with_seed(42);
//! let trajectory = run_pipeline(&graph, &request, &EngineConfig::default())?;
//! for decision in &trajectory.decision_points {
//!     println!("t={} criticality={:.3}", decision.timestamp, decision.criticality);
//! }
//! ```
//!
//! Every call is a pure function of its arguments. Nothing is read from the
//! environment and nothing is persisted.

pub mod cascade;
pub mod config;
pub mod decision;
pub mod domain;
pub mod error;
pub mod graph;
pub mod inflection;
pub mod intervention;
mod kernel;
pub mod pipeline;
pub mod projection;
pub mod trajectory;
pub mod uncertainty;

pub use cascade::{simulate, CascadeActivation, CascadeResult, FeedbackLoop, LoopKind};
pub use config::{
    CascadeConfig, ConfidenceDecay, DetectorConfig, DomainTables, EngineConfig, FieldThreshold,
    InflectionConfig, InterventionConfig, MagnitudeMerge, ProjectionConfig, ResourceBudget,
    UncertaintyConfig,
};
pub use decision::{detect_decisions, AlternativePathway, DecisionPoint, InterventionKind};
pub use domain::{Domain, StateField, StateVector};
pub use error::{EngineError, Result, Stage};
pub use graph::{DependencyGraph, Edge, EdgeSpec, GraphBuilder, GraphSpec, Node, NodeId, NodeSpec};
pub use inflection::{detect_inflections, InflectionKind, InflectionPoint};
pub use intervention::{evaluate_intervention, InterventionOutcome, InterventionScenario};
pub use pipeline::{run_pipeline, BreachRequest};
pub use projection::{branch, project, reproject, ShockSchedule};
pub use trajectory::{BranchOrigin, CascadeMetadata, Trajectory, TrajectoryPoint, UncertaintySummary};
pub use uncertainty::estimate;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::decision::{AlternativePathway, DecisionPoint, InterventionKind};
    pub use crate::domain::{Domain, StateField, StateVector};
    pub use crate::error::{EngineError, Result};
    pub use crate::graph::{DependencyGraph, GraphSpec};
    pub use crate::inflection::{InflectionKind, InflectionPoint};
    pub use crate::intervention::{evaluate_intervention, InterventionScenario};
    pub use crate::pipeline::{run_pipeline, BreachRequest};
    pub use crate::trajectory::{Trajectory, TrajectoryPoint};
}
