//! # Cascade Simulator
//!
//! Propagates a shock from the breach nodes through a [`DependencyGraph`].
//!
//! Table of Contents:
//! 1. CascadeActivation / FeedbackLoop / CascadeResult — Output types
//! 2. simulate — Time-ordered wave propagation
//! 3. Feedback loop enumeration and classification
//!
//! Propagation pops events in activation-time order (a min-heap on time, FIFO
//! among ties). A node is activated the first time an event reaches it; later
//! events only merge magnitude according to [`MagnitudeMerge`] and are
//! re-propagated when they raise it by more than `saturation_epsilon`. A path
//! stops when its magnitude falls below `saturation_epsilon` or its time
//! passes `max_time`. Outside reinforcing loops a hop never forwards more
//! magnitude than its source holds.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use crate::config::{CascadeConfig, DomainTables, MagnitudeMerge};
use crate::domain::Domain;
use crate::error::{EngineError, Result};
use crate::graph::{DependencyGraph, NodeId};

// ─────────────────────────────────────────────
// 1. Output types
// ─────────────────────────────────────────────

/// First activation of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeActivation {
    pub node: NodeId,
    pub domain: Domain,
    pub activation_time: f64,
    /// Merged magnitude over every incoming path
    pub magnitude: f64,
    pub wave_index: u32,
    /// Node whose event activated this one (None for breach nodes)
    pub parent: Option<NodeId>,
}

/// Classification of a feedback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    Reinforcing,
    Dampening,
}

/// A simple cycle in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackLoop {
    /// Cycle members, starting at the smallest node index
    pub nodes: Vec<NodeId>,
    pub domains: Vec<Domain>,
    pub kind: LoopKind,
    /// Product of effective edge weights around the cycle
    pub amplification: f64,
    /// Geometric mean of effective edge weights
    pub strength: f64,
    /// Whether every member was reached by this cascade
    pub active: bool,
}

/// Output of [`simulate`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CascadeResult {
    /// Ordered by activation time (and wave index among ties)
    pub activations: Vec<CascadeActivation>,
    pub feedback_loops: Vec<FeedbackLoop>,
    /// Loop enumeration hit `max_cycles` or `max_loop_search_steps`
    pub loops_truncated: bool,
    /// Propagation hit `max_events`
    pub events_truncated: bool,
}

impl CascadeResult {
    /// Deepest wave index reached.
    pub fn depth(&self) -> u32 {
        self.activations.iter().map(|a| a.wave_index).max().unwrap_or(0)
    }

    /// Number of distinct waves.
    pub fn wave_count(&self) -> usize {
        let mut waves: Vec<u32> = self.activations.iter().map(|a| a.wave_index).collect();
        waves.dedup();
        waves.len()
    }

    /// Activated nodes per domain.
    pub fn domain_histogram(&self) -> BTreeMap<Domain, usize> {
        let mut hist = BTreeMap::new();
        for a in &self.activations {
            *hist.entry(a.domain).or_insert(0) += 1;
        }
        hist
    }

    pub fn activation(&self, node: NodeId) -> Option<&CascadeActivation> {
        self.activations.iter().find(|a| a.node == node)
    }
}

// ─────────────────────────────────────────────
// 2. simulate
// ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Event {
    time: f64,
    magnitude: f64,
    node: NodeId,
    parent: Option<NodeId>,
    parent_wave: Option<u32>,
    seq: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed: BinaryHeap pops the earliest time, then the earliest push.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Propagate a shock from `breach_nodes` through `graph`.
///
/// Breach nodes start at time 0, magnitude 1.0, wave 0. A successor's
/// candidate time is `current_time + delay(target_domain)` and its candidate
/// magnitude is `current_magnitude * dampening_factor * edge_weight *
/// interaction(source_domain, target_domain)`.
pub fn simulate(
    graph: &DependencyGraph,
    breach_nodes: &[NodeId],
    config: &CascadeConfig,
    tables: &DomainTables,
) -> Result<CascadeResult> {
    config.validate()?;
    tables.validate()?;
    if breach_nodes.is_empty() {
        return Err(EngineError::InvalidGraph("no breach node supplied".into()));
    }
    if let Some(missing) = breach_nodes.iter().find(|b| !graph.contains(**b)) {
        return Err(EngineError::InvalidGraph(format!(
            "breach node index {} is not in the graph",
            missing.0
        )));
    }

    let (mut feedback_loops, loops_truncated) = find_feedback_loops(graph, tables, config);
    let amplifying = amplifying_links(&feedback_loops);

    let eps = config.saturation_epsilon;
    let mut slot: Vec<Option<usize>> = vec![None; graph.node_count()];
    let mut activations: Vec<CascadeActivation> = Vec::new();
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    for &b in breach_nodes {
        heap.push(Event {
            time: 0.0,
            magnitude: 1.0,
            node: b,
            parent: None,
            parent_wave: None,
            seq,
        });
        seq += 1;
    }

    let mut last_wave = 0u32;
    let mut processed = 0usize;
    let mut events_truncated = false;

    while let Some(ev) = heap.pop() {
        if ev.time > config.max_time {
            // Heap is time-ordered: nothing left can be in range.
            break;
        }
        processed += 1;
        if processed > config.max_events {
            events_truncated = true;
            tracing::warn!(
                max_events = config.max_events,
                "Cascade propagation stopped at the event cap"
            );
            break;
        }
        if ev.parent.is_some() && ev.magnitude < eps {
            continue;
        }

        let (outgoing_magnitude, wave) = match slot[ev.node.index()] {
            None => {
                let wave = match ev.parent_wave {
                    None => 0,
                    Some(pw) => (pw + 1).max(last_wave),
                };
                last_wave = last_wave.max(wave);
                let magnitude = match config.merge {
                    MagnitudeMerge::Max => ev.magnitude.min(config.saturation_bound),
                    MagnitudeMerge::SumCapped { cap } => ev.magnitude.min(cap),
                };
                slot[ev.node.index()] = Some(activations.len());
                activations.push(CascadeActivation {
                    node: ev.node,
                    domain: graph.domain_of(ev.node),
                    activation_time: ev.time,
                    magnitude,
                    wave_index: wave,
                    parent: ev.parent,
                });
                (magnitude, wave)
            }
            Some(i) => {
                let act = &mut activations[i];
                let old = act.magnitude;
                let merged = match config.merge {
                    MagnitudeMerge::Max => old.max(ev.magnitude.min(config.saturation_bound)),
                    MagnitudeMerge::SumCapped { cap } => (old + ev.magnitude).min(cap),
                };
                if merged - old <= eps {
                    continue;
                }
                act.magnitude = merged;
                let forwarded = match config.merge {
                    MagnitudeMerge::Max => merged,
                    MagnitudeMerge::SumCapped { .. } => merged - old,
                };
                (forwarded, act.wave_index)
            }
        };

        for edge in graph.outgoing(ev.node) {
            let mut magnitude =
                outgoing_magnitude * config.dampening_factor * graph.effective_weight(edge, tables);
            if !amplifying.contains(&(ev.node, edge.target)) {
                magnitude = magnitude.min(outgoing_magnitude);
            }
            if magnitude < eps {
                continue;
            }
            let time = ev.time + tables.delay(graph.domain_of(edge.target));
            if time > config.max_time {
                continue;
            }
            heap.push(Event {
                time,
                magnitude,
                node: edge.target,
                parent: Some(ev.node),
                parent_wave: Some(wave),
                seq,
            });
            seq += 1;
        }
    }

    for l in &mut feedback_loops {
        l.active = l.nodes.iter().all(|n| slot[n.index()].is_some());
    }

    let result = CascadeResult {
        activations,
        feedback_loops,
        loops_truncated,
        events_truncated,
    };

    tracing::debug!(
        activations = result.activations.len(),
        waves = result.wave_count(),
        depth = result.depth(),
        loops = result.feedback_loops.len(),
        events = processed,
        "Cascade simulated"
    );

    Ok(result)
}

// ─────────────────────────────────────────────
// 3. Feedback loops
// ─────────────────────────────────────────────

/// Strongly connected component of every node that can lie on a cycle
/// (None for nodes in acyclic parts of the graph).
fn cyclic_components(graph: &DependencyGraph) -> Vec<Option<usize>> {
    let n = graph.node_count();
    let mut g = DiGraph::<(), ()>::with_capacity(n, 0);
    let ids: Vec<_> = (0..n).map(|_| g.add_node(())).collect();
    for (s, &from) in ids.iter().enumerate() {
        for edge in graph.outgoing(NodeId(s as u32)) {
            g.add_edge(from, ids[edge.target.index()], ());
        }
    }

    let mut component = vec![None; n];
    for (c, members) in tarjan_scc(&g).into_iter().enumerate() {
        let cyclic = members.len() > 1 || members.iter().any(|&m| g.contains_edge(m, m));
        if cyclic {
            for m in members {
                component[m.index()] = Some(c);
            }
        }
    }
    component
}

/// Enumerate simple cycles up to `max_cycle_length` and classify them.
///
/// Each cycle is rooted at its smallest node index, so it is reported once.
/// The search only walks inside cyclic strongly connected components and
/// gives up after `max_loop_search_steps` edge visits.
/// Parallel edges between the same pair count as one link (the strongest).
fn find_feedback_loops(
    graph: &DependencyGraph,
    tables: &DomainTables,
    config: &CascadeConfig,
) -> (Vec<FeedbackLoop>, bool) {
    let n = graph.node_count();
    let component = cyclic_components(graph);
    let mut loops = Vec::new();
    let mut on_path = vec![false; n];
    let mut path: Vec<NodeId> = Vec::with_capacity(config.max_cycle_length);
    let mut stack: Vec<(NodeId, usize)> = Vec::with_capacity(config.max_cycle_length);
    let mut steps = 0usize;

    for s in 0..n {
        let Some(c) = component[s] else {
            continue;
        };
        let start = NodeId(s as u32);
        path.clear();
        stack.clear();
        path.push(start);
        stack.push((start, 0));
        on_path[s] = true;

        while let Some(top) = stack.len().checked_sub(1) {
            let (v, next) = stack[top];
            let out = graph.outgoing(v);
            if next >= out.len() {
                stack.pop();
                path.pop();
                on_path[v.index()] = false;
                continue;
            }
            stack[top].1 += 1;

            steps += 1;
            if steps > config.max_loop_search_steps {
                tracing::warn!(
                    max_loop_search_steps = config.max_loop_search_steps,
                    loops = loops.len(),
                    "Feedback loop search ran out of steps"
                );
                return (loops, true);
            }

            let w = out[next].target;
            if next + 1 < out.len() && out[next + 1].target == w {
                continue;
            }
            if w == start {
                if loops.len() == config.max_cycles {
                    tracing::warn!(
                        max_cycles = config.max_cycles,
                        "Feedback loop enumeration truncated"
                    );
                    return (loops, true);
                }
                loops.push(classify_loop(graph, tables, &path));
            } else if w.index() > s
                && component[w.index()] == Some(c)
                && !on_path[w.index()]
                && path.len() < config.max_cycle_length
            {
                on_path[w.index()] = true;
                path.push(w);
                stack.push((w, 0));
            }
        }
    }

    (loops, false)
}

/// Directed links that lie on a reinforcing loop; only these may forward
/// more magnitude than their source holds.
fn amplifying_links(loops: &[FeedbackLoop]) -> HashSet<(NodeId, NodeId)> {
    loops
        .iter()
        .filter(|l| l.kind == LoopKind::Reinforcing)
        .flat_map(|l| {
            let len = l.nodes.len();
            (0..len).map(move |i| (l.nodes[i], l.nodes[(i + 1) % len]))
        })
        .collect()
}

fn strongest_link(graph: &DependencyGraph, tables: &DomainTables, from: NodeId, to: NodeId) -> f64 {
    graph
        .outgoing(from)
        .iter()
        .filter(|e| e.target == to)
        .map(|e| graph.effective_weight(e, tables))
        .fold(0.0, f64::max)
}

fn classify_loop(
    graph: &DependencyGraph,
    tables: &DomainTables,
    cycle: &[NodeId],
) -> FeedbackLoop {
    let len = cycle.len();
    let weights: Vec<f64> = (0..len)
        .map(|i| strongest_link(graph, tables, cycle[i], cycle[(i + 1) % len]))
        .collect();
    let amplification: f64 = weights.iter().product();
    let strength = amplification.powf(1.0 / len as f64);
    let kind = if amplification >= 1.0 || weights.iter().all(|&w| w > 0.5) {
        LoopKind::Reinforcing
    } else {
        LoopKind::Dampening
    };

    FeedbackLoop {
        nodes: cycle.to_vec(),
        domains: cycle.iter().map(|&n| graph.domain_of(n)).collect(),
        kind,
        amplification,
        strength,
        // Filled in once propagation has run
        active: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN_DOMAINS: [Domain; 5] = [
        Domain::Economic,
        Domain::Political,
        Domain::Military,
        Domain::Social,
        Domain::Technological,
    ];

    fn chain_tables() -> DomainTables {
        let delays = [0.1, 0.5, 1.0, 0.25, 2.0];
        CHAIN_DOMAINS
            .iter()
            .zip(delays)
            .fold(DomainTables::uniform(1.0), |t, (&d, delay)| t.with_delay(d, delay))
    }

    fn chain() -> DependencyGraph {
        let names = ["A", "B", "C", "D", "E"];
        let mut b = DependencyGraph::builder();
        for (name, domain) in names.iter().zip(CHAIN_DOMAINS) {
            b = b.node(*name, domain);
        }
        for pair in names.windows(2) {
            b = b.edge(pair[0], pair[1], 1.0);
        }
        b.breach("A").build().unwrap()
    }

    fn config(max_time: f64) -> CascadeConfig {
        CascadeConfig {
            max_time,
            dampening_factor: 0.7,
            saturation_epsilon: 1e-6,
            ..CascadeConfig::default()
        }
    }

    #[test]
    fn test_max_time_zero_activates_only_breach() {
        let g = chain();
        let r = simulate(&g, g.breach_nodes(), &config(0.0), &chain_tables()).unwrap();
        assert_eq!(r.activations.len(), 1);
        let a = &r.activations[0];
        assert_eq!(a.node, g.resolve("A").unwrap());
        assert_eq!(a.magnitude, 1.0);
        assert_eq!(a.wave_index, 0);
        assert_eq!(a.activation_time, 0.0);
    }

    #[test]
    fn test_linear_chain_dampens_per_hop() {
        let g = chain();
        let r = simulate(&g, g.breach_nodes(), &config(100.0), &chain_tables()).unwrap();
        assert_eq!(r.activations.len(), 5);

        for pair in r.activations.windows(2) {
            assert!(pair[1].activation_time > pair[0].activation_time);
        }
        let waves: Vec<u32> = r.activations.iter().map(|a| a.wave_index).collect();
        assert_eq!(waves, vec![0, 1, 2, 3, 4]);

        let e = r.activation(g.resolve("E").unwrap()).unwrap();
        assert!((e.magnitude - 0.2401).abs() < 1e-6, "E magnitude {}", e.magnitude);
        assert_eq!(r.depth(), 4);
        assert_eq!(r.wave_count(), 5);
        assert!(r.feedback_loops.is_empty());
    }

    #[test]
    fn test_unknown_breach_index_rejected() {
        let g = chain();
        let err = simulate(&g, &[NodeId(42)], &config(10.0), &chain_tables()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidGraph(_)));
    }

    fn triangle(w: [f64; 3]) -> DependencyGraph {
        DependencyGraph::builder()
            .node("x", Domain::Economic)
            .node("y", Domain::Economic)
            .node("z", Domain::Economic)
            .edge("x", "y", w[0])
            .edge("y", "z", w[1])
            .edge("z", "x", w[2])
            .breach("x")
            .build()
            .unwrap()
    }

    #[test]
    fn test_strong_cycle_is_reinforcing() {
        let g = triangle([0.9, 0.8, 0.6]);
        let r = simulate(&g, g.breach_nodes(), &config(50.0), &DomainTables::uniform(1.0)).unwrap();
        assert_eq!(r.feedback_loops.len(), 1);
        let l = &r.feedback_loops[0];
        assert_eq!(l.kind, LoopKind::Reinforcing);
        assert_eq!(l.nodes.len(), 3);
        assert!(l.active);
        assert!((l.amplification - 0.9 * 0.8 * 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_weak_link_makes_cycle_dampening() {
        let g = triangle([0.9, 0.5, 0.9]);
        let r = simulate(&g, g.breach_nodes(), &config(50.0), &DomainTables::uniform(1.0)).unwrap();
        assert_eq!(r.feedback_loops[0].kind, LoopKind::Dampening);
    }

    #[test]
    fn test_interaction_weight_counts_toward_classification() {
        let g = triangle([0.9, 0.9, 0.9]);
        let tables = DomainTables::uniform(1.0).with_interaction(Domain::Economic, Domain::Economic, 0.5);
        let r = simulate(&g, g.breach_nodes(), &config(50.0), &tables).unwrap();
        assert_eq!(r.feedback_loops[0].kind, LoopKind::Dampening);
    }

    #[test]
    fn test_cycle_terminates_and_keeps_first_activation() {
        let g = triangle([1.0, 1.0, 1.0]);
        let r = simulate(&g, g.breach_nodes(), &config(1_000.0), &DomainTables::uniform(0.5)).unwrap();
        assert_eq!(r.activations.len(), 3);
        assert!(!r.events_truncated);
        let x = r.activation(g.resolve("x").unwrap()).unwrap();
        assert_eq!(x.magnitude, 1.0);
    }

    #[test]
    fn test_amplifying_loop_saturates() {
        let g = DependencyGraph::builder()
            .node("p", Domain::Economic)
            .node("q", Domain::Economic)
            .edge_with_interaction("p", "q", 1.0, 1.6)
            .edge_with_interaction("q", "p", 1.0, 1.6)
            .breach("p")
            .build()
            .unwrap();
        let mut cfg = config(200.0);
        cfg.saturation_bound = 1.5;
        let r = simulate(&g, g.breach_nodes(), &cfg, &DomainTables::uniform(1.0)).unwrap();
        assert_eq!(r.feedback_loops[0].kind, LoopKind::Reinforcing);
        for a in &r.activations {
            assert!(a.magnitude <= 1.5 + 1e-12);
        }
        let p = r.activation(g.resolve("p").unwrap()).unwrap();
        assert!(p.magnitude > 1.0, "reinforcing loop should grow the breach node");
    }

    fn diamond() -> DependencyGraph {
        DependencyGraph::builder()
            .node("s", Domain::Economic)
            .node("l", Domain::Economic)
            .node("r", Domain::Economic)
            .node("t", Domain::Economic)
            .edge("s", "l", 1.0)
            .edge("s", "r", 1.0)
            .edge_with_interaction("l", "t", 1.0, 1.4)
            .edge_with_interaction("r", "t", 1.0, 1.4)
            .breach("s")
            .build()
            .unwrap()
    }

    #[test]
    fn test_merge_policy_changes_multiply_reached_magnitude() {
        let g = diamond();
        let t = g.resolve("t").unwrap();
        let tables = DomainTables::uniform(1.0);

        let max = simulate(&g, g.breach_nodes(), &config(10.0), &tables).unwrap();
        assert!((max.activation(t).unwrap().magnitude - 0.686).abs() < 1e-12);

        let mut summed = config(10.0);
        summed.merge = MagnitudeMerge::SumCapped { cap: 5.0 };
        let sum = simulate(&g, g.breach_nodes(), &summed, &tables).unwrap();
        assert!((sum.activation(t).unwrap().magnitude - 1.372).abs() < 1e-12);

        summed.merge = MagnitudeMerge::SumCapped { cap: 1.2 };
        let capped = simulate(&g, g.breach_nodes(), &summed, &tables).unwrap();
        assert!((capped.activation(t).unwrap().magnitude - 1.2).abs() < 1e-12);
        assert_eq!(capped.activation(g.resolve("s").unwrap()).unwrap().magnitude, 1.0);
    }

    #[test]
    fn test_activation_time_monotone_in_wave() {
        // Fast two-hop path finishes before a slow one-hop path.
        let g = DependencyGraph::builder()
            .node("root", Domain::Informational)
            .node("fast", Domain::Informational)
            .node("fast2", Domain::Informational)
            .node("slow", Domain::Environmental)
            .edge("root", "fast", 1.0)
            .edge("fast", "fast2", 1.0)
            .edge("root", "slow", 1.0)
            .breach("root")
            .build()
            .unwrap();
        let tables = DomainTables::uniform(0.1).with_delay(Domain::Environmental, 3.0);
        let r = simulate(&g, g.breach_nodes(), &config(10.0), &tables).unwrap();
        for pair in r.activations.windows(2) {
            assert!(pair[0].activation_time <= pair[1].activation_time);
            assert!(pair[0].wave_index <= pair[1].wave_index);
        }
    }

    #[test]
    fn test_cycle_enumeration_truncates() {
        // Complete digraph on 5 nodes has many simple cycles.
        let names = ["a", "b", "c", "d", "e"];
        let mut b = DependencyGraph::builder();
        for n in names {
            b = b.node(n, Domain::Social);
        }
        for s in names {
            for t in names {
                if s != t {
                    b = b.edge(s, t, 0.6);
                }
            }
        }
        let g = b.breach("a").build().unwrap();
        let mut cfg = config(5.0);
        cfg.max_cycles = 10;
        let r = simulate(&g, g.breach_nodes(), &cfg, &DomainTables::uniform(1.0)).unwrap();
        assert!(r.loops_truncated);
        assert_eq!(r.feedback_loops.len(), 10);

        cfg.max_cycles = 10_000;
        let r = simulate(&g, g.breach_nodes(), &cfg, &DomainTables::uniform(1.0)).unwrap();
        assert!(!r.loops_truncated);
        // 10 two-cycles + 20 three-cycles + 30 four-cycles + 24 five-cycles
        assert_eq!(r.feedback_loops.len(), 84);
    }

    #[test]
    fn test_acyclic_dense_graph_skips_loop_search() {
        // Complete forward DAG: no cycles, but exponentially many paths.
        let n = 120;
        let names: Vec<String> = (0..n).map(|i| format!("n{i}")).collect();
        let mut b = DependencyGraph::builder();
        for name in &names {
            b = b.node(name, Domain::Economic);
        }
        for i in 0..n {
            for j in (i + 1)..n {
                b = b.edge(&names[i], &names[j], 0.9);
            }
        }
        let g = b.breach("n0").build().unwrap();
        let mut cfg = config(0.0);
        cfg.max_loop_search_steps = 1;
        let r = simulate(&g, g.breach_nodes(), &cfg, &DomainTables::uniform(1.0)).unwrap();
        assert!(r.feedback_loops.is_empty());
        assert!(!r.loops_truncated);
    }

    #[test]
    fn test_loop_search_step_budget_truncates() {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let mut b = DependencyGraph::builder();
        for n in names {
            b = b.node(n, Domain::Social);
        }
        for s in names {
            for t in names {
                if s != t {
                    b = b.edge(s, t, 0.6);
                }
            }
        }
        let g = b.breach("a").build().unwrap();
        let mut cfg = config(5.0);
        cfg.max_cycles = usize::MAX;
        cfg.max_loop_search_steps = 50;
        let r = simulate(&g, g.breach_nodes(), &cfg, &DomainTables::uniform(1.0)).unwrap();
        assert!(r.loops_truncated);
        assert!(r.feedback_loops.len() < 50);
    }

    #[test]
    fn test_acyclic_path_never_amplifies() {
        let g = DependencyGraph::builder()
            .node("p", Domain::Economic)
            .node("q", Domain::Economic)
            .node("r", Domain::Economic)
            .edge_with_interaction("p", "q", 1.0, 1.6)
            .edge_with_interaction("q", "r", 1.0, 1.6)
            .breach("p")
            .build()
            .unwrap();
        let mut cfg = config(50.0);
        cfg.saturation_bound = 1.5;
        let r = simulate(&g, g.breach_nodes(), &cfg, &DomainTables::uniform(1.0)).unwrap();
        assert!(r.feedback_loops.is_empty());
        let m: Vec<f64> = ["p", "q", "r"]
            .iter()
            .map(|n| r.activation(g.resolve(n).unwrap()).unwrap().magnitude)
            .collect();
        assert_eq!(m, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_event_cap_is_reported() {
        let g = triangle([1.0, 1.0, 1.0]);
        let mut cfg = config(1_000.0);
        cfg.max_events = 2;
        let r = simulate(&g, g.breach_nodes(), &cfg, &DomainTables::uniform(0.5)).unwrap();
        assert!(r.events_truncated);
        assert_eq!(r.activations.len(), 2);
        let meta = crate::trajectory::CascadeMetadata::from(&r);
        assert!(meta.events_truncated);
    }

    #[test]
    fn test_domain_histogram() {
        let g = chain();
        let r = simulate(&g, g.breach_nodes(), &config(100.0), &chain_tables()).unwrap();
        let hist = r.domain_histogram();
        assert_eq!(hist.len(), 5);
        assert!(hist.values().all(|&c| c == 1));
    }
}
