//! Self-coverage correction
//!
//! After cycles are collapsed the exclusive coverage carried over from the
//! profiler no longer matches the graph. Every non-root node gets it back
//! from its edges: what flows in minus what flows out to callees is the
//! time spent in the node itself.
//!
//! ```text
//! self_coverage = round(100 * (in_weight - out_weight) / total_samples, 1)
//! ```
//!
//! Roots (zero incoming weight) are skipped because their inclusive share is
//! not observable from edge weights.

use crate::call_graph::{round_to, CallGraph, GraphError, NodeId};
use serde::Serialize;
use tracing::{debug, warn};

/// Summary of a correction pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionReport {
    /// Nodes whose self coverage was recomputed
    pub updated: usize,
    /// Roots left untouched
    pub roots_skipped: usize,
    /// Nodes whose callees outweighed their callers (clamped to zero)
    pub clamped: Vec<String>,
}

/// Recompute self coverage for every non-root node
///
/// The graph must be acyclic. All values are computed against the same
/// graph state before any node is updated.
pub fn fix_self_coverage(graph: &mut CallGraph) -> Result<CorrectionReport, GraphError> {
    let order = graph.topological_order()?;
    let samples = graph.total_samples();
    let mut report = CorrectionReport::default();
    let mut updates: Vec<(NodeId, f64)> = Vec::with_capacity(order.len());

    for id in order {
        let in_weight = graph.in_weight(id);
        if in_weight == 0.0 {
            report.roots_skipped += 1;
            continue;
        }
        if samples == 0 {
            return Err(GraphError::NoSamples);
        }

        let out_weight = graph.out_weight(id);
        let mut value = round_to(100.0 * (in_weight - out_weight) / samples as f64, 1);
        if value < 0.0 {
            let name = graph
                .node(id)
                .map_or_else(String::new, |n| n.profiler_id.clone());
            warn!(
                node = %name,
                in_weight,
                out_weight,
                "callees outweigh callers, clamping self coverage to zero"
            );
            report.clamped.push(name);
            value = 0.0;
        }
        updates.push((id, value));
    }

    for (id, value) in updates {
        if let Some(node) = graph.node_mut(id) {
            node.self_coverage = value;
            report.updated += 1;
        }
    }

    debug!(
        updated = report.updated,
        roots = report.roots_skipped,
        "self coverage corrected"
    );
    Ok(report)
}
