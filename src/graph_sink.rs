//! Graph snapshots and the sinks that receive them
//!
//! The pipeline hands the graph to a sink twice: once right after parsing
//! (label `debug`) and once after pruning (label `final`). Sinks:
//!
//! - [`JsonGraphSink`] writes `graph_<label>.json` for the selection stage
//! - [`DotGraphSink`] writes `graph_<label>.dot` for plotting
//! - [`MemorySink`] keeps snapshots in memory
//! - [`SinkSet`] fans out to several sinks

use crate::call_graph::{CallGraph, SelectionState};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while persisting a snapshot
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize graph: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serializable view of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub name: String,
    pub coverage: f64,
    pub self_coverage: f64,
    pub is_interest_point: bool,
    pub selection: SelectionState,
}

/// Serializable view of one edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

/// Serializable view of a whole graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub total_samples: u64,
    pub coverage: f64,
    pub selector: Option<String>,
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl GraphSnapshot {
    /// Capture the current state of `graph`
    pub fn from_graph(graph: &CallGraph) -> Self {
        let nodes = graph
            .node_ids()
            .filter_map(|id| graph.node(id))
            .map(|node| NodeSnapshot {
                id: node.profiler_id.clone(),
                name: node.name.clone(),
                coverage: node.coverage,
                self_coverage: node.self_coverage,
                is_interest_point: node.is_interest_point,
                selection: node.selection.clone(),
            })
            .collect();

        let profiler_id = |id| {
            graph
                .node(id)
                .map_or_else(String::new, |n| n.profiler_id.clone())
        };
        let edges = graph
            .edges()
            .into_iter()
            .map(|(from, to, weight)| EdgeSnapshot {
                from: profiler_id(from),
                to: profiler_id(to),
                weight,
            })
            .collect();

        Self {
            total_samples: graph.total_samples(),
            coverage: graph.coverage,
            selector: graph.selector.clone(),
            nodes,
            edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Sum of self coverage over all nodes
    pub fn total_self_coverage(&self) -> f64 {
        self.nodes.iter().map(|n| n.self_coverage).sum()
    }

    /// Render as a Graphviz digraph
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph callgraph {{");
        let _ = writeln!(
            out,
            "  graph [label=\"total samples: {}\"];",
            self.total_samples
        );
        let _ = writeln!(out, "  node [shape=box];");
        for node in &self.nodes {
            let style = if node.is_interest_point {
                ", style=filled, fillcolor=lightblue"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\\n{:.1}% / {:.1}%\"{}];",
                node.id,
                escape_label(&node.name),
                node.self_coverage,
                node.coverage,
                style
            );
        }
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                edge.from, edge.to, edge.weight
            );
        }
        out.push_str("}\n");
        out
    }
}

/// Quote characters that would end a dot label early
fn escape_label(name: &str) -> String {
    name.replace('"', "\\\"")
}

/// Receiver of graph snapshots
pub trait GraphSink {
    /// Persist or display `graph` under `label`
    fn emit(&mut self, label: &str, graph: &CallGraph) -> Result<(), SinkError>;
}

/// Writes `graph_<label>.json` into a directory
#[derive(Debug, Clone)]
pub struct JsonGraphSink {
    dir: PathBuf,
}

impl JsonGraphSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("graph_{}.json", label))
    }
}

impl GraphSink for JsonGraphSink {
    fn emit(&mut self, label: &str, graph: &CallGraph) -> Result<(), SinkError> {
        let snapshot = GraphSnapshot::from_graph(graph);
        let json = serde_json::to_string_pretty(&snapshot)?;
        write_file(&self.path_for(label), &json)
    }
}

/// Writes `graph_<label>.dot` into a directory
#[derive(Debug, Clone)]
pub struct DotGraphSink {
    dir: PathBuf,
}

impl DotGraphSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("graph_{}.dot", label))
    }
}

impl GraphSink for DotGraphSink {
    fn emit(&mut self, label: &str, graph: &CallGraph) -> Result<(), SinkError> {
        let dot = GraphSnapshot::from_graph(graph).to_dot();
        write_file(&self.path_for(label), &dot)
    }
}

/// Keeps every snapshot in memory, in emission order
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub snapshots: Vec<(String, GraphSnapshot)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&GraphSnapshot> {
        self.snapshots
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, snapshot)| snapshot)
    }
}

impl GraphSink for MemorySink {
    fn emit(&mut self, label: &str, graph: &CallGraph) -> Result<(), SinkError> {
        self.snapshots
            .push((label.to_string(), GraphSnapshot::from_graph(graph)));
        Ok(())
    }
}

/// Forwards each snapshot to every contained sink
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn GraphSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl GraphSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSet")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl GraphSink for SinkSet {
    fn emit(&mut self, label: &str, graph: &CallGraph) -> Result<(), SinkError> {
        for sink in &mut self.sinks {
            sink.emit(label, graph)?;
        }
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    fs::write(path, contents).map_err(io_err)
}
