//! Weighted call graph built from profiler records
//!
//! Nodes live in an arena indexed by [`NodeId`]; the profiler's string ids
//! (`N1`, `N2`, ...) are only used at the edges of the API through a side
//! index. Edges are simple (no parallel edges): repeated declarations
//! between the same ordered pair accumulate into one weight.
//!
//! # Example
//!
//! ```
//! use codelet_callgraph::call_graph::CallGraph;
//!
//! # fn main() -> Result<(), codelet_callgraph::call_graph::GraphError> {
//! let mut graph = CallGraph::new();
//! graph.add_node("N1", "main", 0.0, 100.0)?;
//! graph.add_node("N2", "__cere__loop_12", 40.0, 40.0)?;
//! graph.add_edge("N1", "N2", 5)?;
//! graph.add_edge("N1", "N2", 3)?;
//!
//! let main = graph.node_by_profiler_id("N1").unwrap();
//! let inner = graph.node_by_profiler_id("N2").unwrap();
//! assert_eq!(graph.edge_weight(main, inner), Some(8.0));
//! assert!(graph.node(inner).unwrap().is_interest_point);
//! # Ok(())
//! # }
//! ```

use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// Symbol-name token marking instrumented candidate regions
pub const DEFAULT_INTEREST_MARKER: &str = "__cere__";

/// Structural errors on the call graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Edge {from} -> {to} references undeclared node {missing}")]
    UnknownNode {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Node handle {0:?} is not present in the graph")]
    MissingHandle(NodeId),

    #[error("Node id {0} was removed and cannot be reintroduced")]
    RetiredId(String),

    #[error("Graph still contains a cycle through {0}")]
    Cyclic(String),

    #[error("Total sample count is zero; coverage cannot be derived")]
    NoSamples,

    #[error("Root node {0} is not an interest point and cannot be pruned without dropping its weight")]
    UnprunableRoot(String),
}

/// Stable arena handle for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Bookkeeping used by the later selection stages
///
/// None of the graph algorithms read or change these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionState {
    pub matching: bool,
    pub error: f64,
    pub error_message: Option<String>,
    pub to_test: bool,
    pub tested: bool,
    pub transferred: bool,
    pub small: bool,
    pub selected: bool,
    pub invivo: f64,
    pub invitro: f64,
    pub invocations: Vec<u64>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            matching: false,
            error: 100.0,
            error_message: None,
            to_test: false,
            tested: false,
            transferred: false,
            small: false,
            selected: false,
            invivo: 0.0,
            invitro: 0.0,
            invocations: Vec::new(),
        }
    }
}

/// A function in the call graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Id assigned by the profiler (stable within one parse only)
    pub profiler_id: String,
    /// Symbol name
    pub name: String,
    /// Inclusive coverage, percent of total samples
    pub coverage: f64,
    /// Exclusive coverage, percent of total samples
    pub self_coverage: f64,
    /// Name carries the instrumentation marker
    pub is_interest_point: bool,
    pub selection: SelectionState,
}

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    successors: BTreeMap<NodeId, f64>,
    predecessors: BTreeMap<NodeId, f64>,
}

/// Directed, weighted, simple call graph
#[derive(Debug, Clone)]
pub struct CallGraph {
    slots: Vec<Option<Slot>>,
    index: FnvHashMap<String, NodeId>,
    retired: FnvHashSet<String>,
    interest_marker: String,
    total_samples: u64,
    /// Graph-level coverage, reserved for the selection stage
    pub coverage: f64,
    /// Opaque selector, reserved for the selection stage
    pub selector: Option<String>,
}

impl Default for CallGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CallGraph {
    /// Create an empty graph using [`DEFAULT_INTEREST_MARKER`]
    pub fn new() -> Self {
        Self::with_interest_marker(DEFAULT_INTEREST_MARKER)
    }

    /// Create an empty graph with a custom interest marker
    pub fn with_interest_marker(marker: impl Into<String>) -> Self {
        Self {
            slots: Vec::new(),
            index: FnvHashMap::default(),
            retired: FnvHashSet::default(),
            interest_marker: marker.into(),
            total_samples: 0,
            coverage: 0.0,
            selector: None,
        }
    }

    /// Token that marks a symbol as an interest point
    pub fn interest_marker(&self) -> &str {
        &self.interest_marker
    }

    /// Whether `name` carries the interest marker
    pub fn is_interest_name(&self, name: &str) -> bool {
        name.contains(&self.interest_marker)
    }

    /// Declare a node
    ///
    /// Redeclaring a live id overwrites its attributes (last write wins)
    /// and keeps its edges. Ids removed by collapse or prune are rejected.
    pub fn add_node(
        &mut self,
        profiler_id: &str,
        name: &str,
        self_coverage: f64,
        coverage: f64,
    ) -> Result<NodeId, GraphError> {
        if self.retired.contains(profiler_id) {
            return Err(GraphError::RetiredId(profiler_id.to_string()));
        }

        let node = Node {
            profiler_id: profiler_id.to_string(),
            name: name.to_string(),
            coverage,
            self_coverage,
            is_interest_point: self.is_interest_name(name),
            selection: SelectionState::default(),
        };

        if let Some(&id) = self.index.get(profiler_id) {
            if let Some(slot) = self.slot_mut(id) {
                slot.node = node;
            }
            return Ok(id);
        }

        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Some(Slot {
            node,
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }));
        self.index.insert(profiler_id.to_string(), id);
        Ok(id)
    }

    /// Declare an edge by profiler ids, accumulating onto an existing one
    pub fn add_edge(&mut self, from: &str, to: &str, weight: u64) -> Result<(), GraphError> {
        let lookup = |id: &str| {
            self.node_by_profiler_id(id)
                .ok_or_else(|| GraphError::UnknownNode {
                    from: from.to_string(),
                    to: to.to_string(),
                    missing: id.to_string(),
                })
        };
        let source = lookup(from)?;
        let target = lookup(to)?;
        self.add_edge_between(source, target, weight as f64)
    }

    /// Create `from -> to` or add `weight` to the existing edge
    pub fn add_edge_between(
        &mut self,
        from: NodeId,
        to: NodeId,
        weight: f64,
    ) -> Result<(), GraphError> {
        if !self.contains(to) {
            return Err(GraphError::MissingHandle(to));
        }
        let slot = self.slot_mut(from).ok_or(GraphError::MissingHandle(from))?;
        let total = {
            let entry = slot.successors.entry(to).or_insert(0.0);
            *entry += weight;
            *entry
        };
        if let Some(target) = self.slot_mut(to) {
            target.predecessors.insert(from, total);
        }
        Ok(())
    }

    /// Overwrite the weight of an existing edge
    pub fn set_edge_weight(&mut self, from: NodeId, to: NodeId, weight: f64) -> bool {
        let Some(slot) = self.slot_mut(from) else {
            return false;
        };
        match slot.successors.get_mut(&to) {
            Some(w) => *w = weight,
            None => return false,
        }
        if let Some(target) = self.slot_mut(to) {
            target.predecessors.insert(from, weight);
        }
        true
    }

    /// Remove an edge, returning its weight
    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> Option<f64> {
        let weight = self.slot_mut(from)?.successors.remove(&to)?;
        if let Some(target) = self.slot_mut(to) {
            target.predecessors.remove(&from);
        }
        Some(weight)
    }

    /// Remove every edge incident to `id`
    pub fn detach(&mut self, id: NodeId) {
        let (preds, succs) = match self.slot(id) {
            Some(slot) => (
                slot.predecessors.keys().copied().collect::<Vec<_>>(),
                slot.successors.keys().copied().collect::<Vec<_>>(),
            ),
            None => return,
        };
        for pred in preds {
            self.remove_edge(pred, id);
        }
        for succ in succs {
            self.remove_edge(id, succ);
        }
    }

    /// Delete a node and its edges; its profiler id can never come back
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        if !self.contains(id) {
            return Err(GraphError::MissingHandle(id));
        }
        self.detach(id);
        let slot = self.slots[id.0 as usize]
            .take()
            .ok_or(GraphError::MissingHandle(id))?;
        self.index.remove(&slot.node.profiler_id);
        self.retired.insert(slot.node.profiler_id.clone());
        Ok(slot.node)
    }

    /// Add the legend's sample count to the run total
    pub fn add_total_samples(&mut self, samples: u64) {
        self.total_samples += samples;
    }

    /// Total samples reported by the profiler for the run
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slot(id).map(|slot| &slot.node)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slot_mut(id).map(|slot| &mut slot.node)
    }

    /// Look up a live node by its profiler id
    pub fn node_by_profiler_id(&self, profiler_id: &str) -> Option<NodeId> {
        self.index.get(profiler_id).copied()
    }

    /// Live node handles, in declaration order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| NodeId(idx as u32))
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn edge_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.successors.len())
            .sum()
    }

    /// All edges as `(from, to, weight)`, ordered by source then target
    pub fn edges(&self) -> Vec<(NodeId, NodeId, f64)> {
        self.node_ids()
            .flat_map(|from| self.successors(from).map(move |(to, w)| (from, to, w)))
            .collect()
    }

    pub fn edge_weight(&self, from: NodeId, to: NodeId) -> Option<f64> {
        self.slot(from)?.successors.get(&to).copied()
    }

    /// Callers of `id` with the weight of each call edge
    pub fn predecessors(&self, id: NodeId) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.slot(id)
            .into_iter()
            .flat_map(|slot| slot.predecessors.iter().map(|(&n, &w)| (n, w)))
    }

    /// Callees of `id` with the weight of each call edge
    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.slot(id)
            .into_iter()
            .flat_map(|slot| slot.successors.iter().map(|(&n, &w)| (n, w)))
    }

    /// Sum of incoming edge weights
    pub fn in_weight(&self, id: NodeId) -> f64 {
        self.predecessors(id).map(|(_, w)| w).sum()
    }

    /// Sum of outgoing edge weights
    pub fn out_weight(&self, id: NodeId) -> f64 {
        self.successors(id).map(|(_, w)| w).sum()
    }

    /// Nodes with zero incoming weight
    pub fn roots(&self) -> Vec<NodeId> {
        self.node_ids().filter(|&id| self.in_weight(id) == 0.0).collect()
    }

    /// Sum of self coverage over all live nodes
    pub fn total_self_coverage(&self) -> f64 {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.node.self_coverage)
            .sum()
    }

    /// Kahn topological order, ties broken by declaration order
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut pending: FnvHashMap<NodeId, usize> = self
            .node_ids()
            .map(|id| (id, self.slot(id).map_or(0, |s| s.predecessors.len())))
            .collect();
        let mut ready: VecDeque<NodeId> = self
            .node_ids()
            .filter(|id| pending.get(id) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            for (succ, _) in self.successors(id) {
                if let Some(count) = pending.get_mut(&succ) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(succ);
                    }
                }
            }
        }

        if order.len() != pending.len() {
            let stuck = self
                .node_ids()
                .find(|id| pending.get(id).is_some_and(|&c| c > 0))
                .and_then(|id| self.node(id))
                .map_or_else(String::new, |n| n.profiler_id.clone());
            return Err(GraphError::Cyclic(stuck));
        }
        Ok(order)
    }

    /// Find one elementary cycle, if any
    ///
    /// Iterative DFS; the first back edge closes the cycle. The returned
    /// members are in path order, starting at the back edge's target. A
    /// self-loop yields a single member.
    pub fn find_cycle(&self) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnPath,
            Done,
        }

        let mut marks = vec![Mark::New; self.slots.len()];
        for start in self.node_ids() {
            if marks[start.0 as usize] != Mark::New {
                continue;
            }
            let mut path: Vec<NodeId> = vec![start];
            let mut frames: Vec<std::vec::IntoIter<NodeId>> = vec![self.successor_ids(start)];
            marks[start.0 as usize] = Mark::OnPath;

            while let Some(frame) = frames.last_mut() {
                match frame.next() {
                    Some(next) => match marks[next.0 as usize] {
                        Mark::New => {
                            marks[next.0 as usize] = Mark::OnPath;
                            path.push(next);
                            frames.push(self.successor_ids(next));
                        }
                        Mark::OnPath => {
                            let pos = path.iter().position(|&n| n == next)?;
                            return Some(path[pos..].to_vec());
                        }
                        Mark::Done => {}
                    },
                    None => {
                        frames.pop();
                        if let Some(done) = path.pop() {
                            marks[done.0 as usize] = Mark::Done;
                        }
                    }
                }
            }
        }
        None
    }

    pub fn is_acyclic(&self) -> bool {
        self.find_cycle().is_none()
    }

    fn successor_ids(&self, id: NodeId) -> std::vec::IntoIter<NodeId> {
        self.successors(id)
            .map(|(n, _)| n)
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }
}

/// Round to a fixed number of decimal places, halves to the even neighbor
///
/// Ties must not round up: shares of 1/8 and 7/8 would otherwise credit
/// 0.13 + 0.88 and create samples out of nothing.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}
