//! Cycle collapsing
//!
//! Recursive call chains show up in the profiler graph as cycles. Each one
//! is replaced by a single surviving member: the member with the highest
//! inclusive coverage keeps its identity, every other member is deleted,
//! and the edges that crossed the cycle boundary are reattached to the
//! survivor with their weights summed.
//!
//! ```text
//!   P ──5──▶ A ──▶ B ──3──▶ S            P ──5──▶ B ──3──▶ S
//!            ▲     │                 ⇒
//!            └─────┘                     (B had the higher coverage)
//! ```
//!
//! Collapsing can expose indirect recursion that was hidden behind the
//! removed members, so cycles are searched again after every collapse
//! until none remain. Each step either deletes at least one node or strips
//! a self-loop, which bounds the loop.

use crate::call_graph::{round_to, CallGraph, GraphError, NodeId};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One collapsed cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollapsedCycle {
    /// Profiler id of the surviving member
    pub survivor: String,
    /// Profiler ids of the removed members
    pub removed: Vec<String>,
    /// Coverage recomputed for the survivor
    pub coverage: f64,
}

/// Summary of a collapse pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollapseReport {
    pub cycles: Vec<CollapsedCycle>,
    /// Cycles made of a single self-recursive node
    pub self_loops_stripped: usize,
    pub nodes_removed: usize,
}

impl CollapseReport {
    pub fn cycles_collapsed(&self) -> usize {
        self.cycles.len()
    }
}

/// Collapse cycles until the graph is acyclic
///
/// Running this on a graph without cycles leaves it untouched.
pub fn collapse_cycles(graph: &mut CallGraph) -> Result<CollapseReport, GraphError> {
    let mut report = CollapseReport::default();

    while let Some(cycle) = graph.find_cycle() {
        let collapsed = collapse_cycle(graph, &cycle)?;
        if collapsed.removed.is_empty() {
            report.self_loops_stripped += 1;
        }
        report.nodes_removed += collapsed.removed.len();
        report.cycles.push(collapsed);
    }

    if report.cycles_collapsed() > 0 {
        info!(
            cycles = report.cycles_collapsed(),
            self_loops = report.self_loops_stripped,
            nodes_removed = report.nodes_removed,
            "collapsed call graph cycles"
        );
    }
    Ok(report)
}

/// Collapse one cycle into its highest-coverage member
///
/// `cycle` may list a member more than once; duplicates are ignored.
pub fn collapse_cycle(
    graph: &mut CallGraph,
    cycle: &[NodeId],
) -> Result<CollapsedCycle, GraphError> {
    if graph.total_samples() == 0 {
        return Err(GraphError::NoSamples);
    }

    let mut members: Vec<NodeId> = Vec::with_capacity(cycle.len());
    for &id in cycle {
        if !graph.contains(id) {
            return Err(GraphError::MissingHandle(id));
        }
        if !members.contains(&id) {
            members.push(id);
        }
    }
    let survivor = select_survivor(graph, &members)?;

    // Boundary weights, summed per outside neighbor
    let mut inbound: BTreeMap<NodeId, f64> = BTreeMap::new();
    let mut outbound: BTreeMap<NodeId, f64> = BTreeMap::new();
    for &member in &members {
        for (pred, weight) in graph.predecessors(member) {
            if !members.contains(&pred) {
                *inbound.entry(pred).or_insert(0.0) += weight;
            }
        }
        for (succ, weight) in graph.successors(member) {
            if !members.contains(&succ) {
                *outbound.entry(succ).or_insert(0.0) += weight;
            }
        }
    }

    let survivor_id = graph
        .node(survivor)
        .map(|n| n.profiler_id.clone())
        .ok_or(GraphError::MissingHandle(survivor))?;

    let mut removed = Vec::with_capacity(members.len() - 1);
    for &member in members.iter().filter(|&&m| m != survivor) {
        removed.push(graph.remove_node(member)?.profiler_id);
    }
    graph.detach(survivor);

    for (pred, weight) in inbound {
        graph.add_edge_between(pred, survivor, weight)?;
        truncate_edge(graph, pred, survivor);
    }
    for (succ, weight) in outbound {
        graph.add_edge_between(survivor, succ, weight)?;
        truncate_edge(graph, survivor, succ);
    }

    // Self coverage stays stale here; the corrector recomputes it globally.
    let coverage = round_to(
        100.0 * graph.in_weight(survivor) / graph.total_samples() as f64,
        1,
    );
    if let Some(node) = graph.node_mut(survivor) {
        node.coverage = coverage;
    }

    if removed.is_empty() {
        warn!(node = %survivor_id, "stripped self-recursive edge");
    } else {
        debug!(
            survivor = %survivor_id,
            removed = ?removed,
            coverage,
            "collapsed cycle"
        );
    }

    Ok(CollapsedCycle {
        survivor: survivor_id,
        removed,
        coverage,
    })
}

/// Member with strictly highest coverage; the first one seen wins ties
fn select_survivor(graph: &CallGraph, members: &[NodeId]) -> Result<NodeId, GraphError> {
    let mut best: Option<(NodeId, f64)> = None;
    for &member in members {
        let coverage = graph
            .node(member)
            .ok_or(GraphError::MissingHandle(member))?
            .coverage;
        match best {
            Some((_, top)) if coverage <= top => {}
            _ => best = Some((member, coverage)),
        }
    }
    best.map(|(id, _)| id)
        .ok_or_else(|| GraphError::Cyclic("empty cycle".to_string()))
}

/// Reattached weights are whole sample counts
fn truncate_edge(graph: &mut CallGraph, from: NodeId, to: NodeId) {
    if let Some(weight) = graph.edge_weight(from, to) {
        graph.set_edge_weight(from, to, weight.trunc());
    }
}
