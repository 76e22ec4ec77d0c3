//! # Dependency Graph
//!
//! Immutable directed graph over stable integer node indices. Nodes live in
//! an arena (`Vec<Node>`), edges are stored sorted by source so each node's
//! outgoing edges are a contiguous slice. Cycles are allowed.
//!
//! Table of Contents:
//! 1. NodeId / Node / Edge
//! 2. GraphSpec — Serializable input form (string ids, string domain tags)
//! 3. DependencyGraph — Validated arena graph
//! 4. GraphBuilder — Programmatic construction

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DomainTables;
use crate::domain::Domain;
use crate::error::{EngineError, Result};

// ─────────────────────────────────────────────
// 1. NodeId / Node / Edge
// ─────────────────────────────────────────────

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node: caller-facing identifier plus its domain tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub domain: Domain,
}

/// A weighted, directed coupling between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    /// Coupling strength in [0, 1]
    pub weight: f64,
    /// Replaces the domain-pair table lookup for this edge when set
    pub interaction_override: Option<f64>,
}

// ─────────────────────────────────────────────
// 2. GraphSpec
// ─────────────────────────────────────────────

/// Graph as supplied by an upstream collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    pub breach_nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source: String,
    pub target: String,
    pub weight: f64,
    #[serde(default)]
    pub interaction: Option<f64>,
}

// ─────────────────────────────────────────────
// 3. DependencyGraph
// ─────────────────────────────────────────────

/// Validated, immutable dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    /// Sorted by (source, target)
    edges: Vec<Edge>,
    /// `edges[offsets[i]..offsets[i + 1]]` are node i's outgoing edges
    offsets: Vec<usize>,
    breach_nodes: Vec<NodeId>,
    index: HashMap<String, NodeId>,
}

impl DependencyGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Validate a [`GraphSpec`] and build the arena form.
    pub fn from_spec(spec: &GraphSpec) -> Result<Self> {
        if spec.nodes.len() > u32::MAX as usize {
            return Err(EngineError::InvalidGraph("too many nodes".into()));
        }

        let mut nodes = Vec::with_capacity(spec.nodes.len());
        let mut index = HashMap::with_capacity(spec.nodes.len());
        for (i, n) in spec.nodes.iter().enumerate() {
            let domain: Domain = n.domain.parse()?;
            if index.insert(n.id.clone(), NodeId(i as u32)).is_some() {
                return Err(EngineError::InvalidGraph(format!("duplicate node id '{}'", n.id)));
            }
            nodes.push(Node { id: n.id.clone(), domain });
        }

        let lookup = |id: &str, role: &str| {
            index.get(id).copied().ok_or_else(|| {
                EngineError::InvalidGraph(format!("edge {role} '{id}' is not a node"))
            })
        };

        let mut edges = Vec::with_capacity(spec.edges.len());
        for e in &spec.edges {
            let source = lookup(&e.source, "source")?;
            let target = lookup(&e.target, "target")?;
            if !e.weight.is_finite() || e.weight < 0.0 {
                return Err(EngineError::InvalidGraph(format!(
                    "edge {} -> {} has negative or non-finite weight {}",
                    e.source, e.target, e.weight
                )));
            }
            if e.weight > 1.0 {
                return Err(EngineError::InvalidGraph(format!(
                    "edge {} -> {} weight {} is outside [0, 1]",
                    e.source, e.target, e.weight
                )));
            }
            if let Some(w) = e.interaction {
                if !w.is_finite() || w < 0.0 {
                    return Err(EngineError::InvalidGraph(format!(
                        "edge {} -> {} has invalid interaction override {w}",
                        e.source, e.target
                    )));
                }
            }
            edges.push(Edge {
                source,
                target,
                weight: e.weight,
                interaction_override: e.interaction,
            });
        }
        edges.sort_by_key(|e| (e.source, e.target));

        let mut offsets = vec![0usize; nodes.len() + 1];
        for e in &edges {
            offsets[e.source.index() + 1] += 1;
        }
        for i in 0..nodes.len() {
            offsets[i + 1] += offsets[i];
        }

        if spec.breach_nodes.is_empty() {
            return Err(EngineError::InvalidGraph("no breach node designated".into()));
        }
        let mut breach_nodes = Vec::with_capacity(spec.breach_nodes.len());
        for id in &spec.breach_nodes {
            let node = index.get(id.as_str()).copied().ok_or_else(|| {
                EngineError::InvalidGraph(format!("breach node '{id}' is not in the graph"))
            })?;
            if !breach_nodes.contains(&node) {
                breach_nodes.push(node);
            }
        }

        Ok(Self {
            nodes,
            edges,
            offsets,
            breach_nodes,
            index,
        })
    }

    /// Serializable form of this graph.
    pub fn to_spec(&self) -> GraphSpec {
        GraphSpec {
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeSpec {
                    id: n.id.clone(),
                    domain: n.domain.as_str().to_string(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeSpec {
                    source: self.nodes[e.source.index()].id.clone(),
                    target: self.nodes[e.target.index()].id.clone(),
                    weight: e.weight,
                    interaction: e.interaction_override,
                })
                .collect(),
            breach_nodes: self
                .breach_nodes
                .iter()
                .map(|b| self.nodes[b.index()].id.clone())
                .collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Domain of a node known to be in the graph.
    pub(crate) fn domain_of(&self, id: NodeId) -> Domain {
        self.nodes[id.index()].domain
    }

    /// Outgoing edges of `id` (empty for unknown ids).
    pub fn outgoing(&self, id: NodeId) -> &[Edge] {
        if !self.contains(id) {
            return &[];
        }
        let i = id.index();
        &self.edges[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Look up a node by its caller-facing identifier.
    pub fn resolve(&self, id: &str) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    /// Designated shock origins.
    pub fn breach_nodes(&self) -> &[NodeId] {
        &self.breach_nodes
    }

    /// Edge weight times the domain-pair interaction (or the edge's override).
    pub fn effective_weight(&self, edge: &Edge, tables: &DomainTables) -> f64 {
        let interaction = edge.interaction_override.unwrap_or_else(|| {
            tables.interaction(self.domain_of(edge.source), self.domain_of(edge.target))
        });
        edge.weight * interaction
    }
}

// ─────────────────────────────────────────────
// 4. GraphBuilder
// ─────────────────────────────────────────────

/// Incremental construction; validation happens in [`GraphBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    spec: GraphSpec,
}

impl GraphBuilder {
    pub fn node(mut self, id: impl Into<String>, domain: Domain) -> Self {
        self.spec.nodes.push(NodeSpec {
            id: id.into(),
            domain: domain.as_str().to_string(),
        });
        self
    }

    pub fn edge(self, source: impl Into<String>, target: impl Into<String>, weight: f64) -> Self {
        self.push_edge(source.into(), target.into(), weight, None)
    }

    /// Edge whose interaction weight bypasses the domain-pair table.
    pub fn edge_with_interaction(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        weight: f64,
        interaction: f64,
    ) -> Self {
        self.push_edge(source.into(), target.into(), weight, Some(interaction))
    }

    pub fn breach(mut self, id: impl Into<String>) -> Self {
        self.spec.breach_nodes.push(id.into());
        self
    }

    pub fn build(self) -> Result<DependencyGraph> {
        DependencyGraph::from_spec(&self.spec)
    }

    fn push_edge(mut self, source: String, target: String, weight: f64, interaction: Option<f64>) -> Self {
        self.spec.edges.push(EdgeSpec {
            source,
            target,
            weight,
            interaction,
        });
        self
    }
}
