//! Pruning of nodes that are not interest points
//!
//! Library frames and scaffolding only exist to complete the call tree.
//! Removing one must not lose its samples, so before deletion:
//!
//! - each caller `p` is credited with a share of the node's self coverage,
//!   `share = round(w(p,n) / in_weight(n), 2)`;
//! - each caller/callee pair is bridged with a direct edge carrying
//!   `round(w(p,n) * w(n,s) / in_weight(n), 2)`, added onto any existing
//!   `p -> s` edge.
//!
//! ```text
//!   P ──6──▶ N ──4──▶ S        P ──4──▶ S
//!            (self 10)     ⇒   (P.self += 10)
//! ```
//!
//! Nodes are visited in topological order so that bridging always sees
//! callers that are still present.

use crate::call_graph::{round_to, CallGraph, GraphError, NodeId};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What to do with a root that is not an interest point
///
/// A root has no caller to absorb its self coverage, so deleting it would
/// drop samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RootPolicy {
    /// Keep the root in the graph
    #[default]
    Retain,
    /// Fail the prune pass
    Forbid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOptions {
    pub root_policy: RootPolicy,
}

/// Summary of a prune pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PruneReport {
    /// Profiler ids of removed nodes, in removal order
    pub removed: Vec<String>,
    /// Non-interest roots kept under [`RootPolicy::Retain`]
    pub retained_roots: Vec<String>,
    /// Edges created or strengthened by bridging
    pub bridged_edges: usize,
}

/// Remove every node that is not an interest point
pub fn prune_nodes(
    graph: &mut CallGraph,
    options: &PruneOptions,
) -> Result<PruneReport, GraphError> {
    let order = graph.topological_order()?;
    let mut report = PruneReport::default();

    for id in order {
        let Some(node) = graph.node(id) else {
            continue;
        };
        if node.is_interest_point {
            continue;
        }
        let profiler_id = node.profiler_id.clone();

        let in_weight = graph.in_weight(id);
        if in_weight == 0.0 {
            match options.root_policy {
                RootPolicy::Retain => {
                    warn!(node = %profiler_id, "keeping root that is not an interest point");
                    report.retained_roots.push(profiler_id);
                    continue;
                }
                RootPolicy::Forbid => return Err(GraphError::UnprunableRoot(profiler_id)),
            }
        }

        report.bridged_edges += remove_and_bridge(graph, id, in_weight)?;
        debug!(node = %profiler_id, "pruned node");
        report.removed.push(profiler_id);
    }

    info!(
        removed = report.removed.len(),
        retained_roots = report.retained_roots.len(),
        bridged_edges = report.bridged_edges,
        "pruned nodes without interest marker"
    );
    Ok(report)
}

/// Redistribute a node's contribution to its neighbors, then delete it
///
/// Returns the number of bridging edges written.
fn remove_and_bridge(
    graph: &mut CallGraph,
    id: NodeId,
    in_weight: f64,
) -> Result<usize, GraphError> {
    let self_coverage = graph
        .node(id)
        .ok_or(GraphError::MissingHandle(id))?
        .self_coverage;
    let callers: Vec<(NodeId, f64)> = graph.predecessors(id).collect();
    let callees: Vec<(NodeId, f64)> = graph.successors(id).collect();

    let mut bridged = 0;
    for &(caller, to_node) in &callers {
        let share = round_to(to_node / in_weight, 2);
        if let Some(node) = graph.node_mut(caller) {
            node.self_coverage = round_to(node.self_coverage + self_coverage * share, 2);
        }
        for &(callee, from_node) in &callees {
            let weight = round_to(to_node * (from_node / in_weight), 2);
            graph.add_edge_between(caller, callee, weight)?;
            bridged += 1;
        }
    }

    graph.remove_node(id)?;
    Ok(bridged)
}
