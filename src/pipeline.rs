//! End-to-end call graph creation
//!
//! ```text
//! renderer stdout ──▶ RecordParser ──▶ CallGraph ──▶ sink("debug")
//!                                          │
//!                                          ▼
//!                 collapse_cycles ──▶ fix_self_coverage ──▶ prune_nodes ──▶ sink("final")
//! ```
//!
//! Input is consumed line by line; a line that matches a pattern but
//! carries a malformed number aborts the run, as does an edge that names
//! an undeclared node.

use crate::call_graph::{CallGraph, GraphError, DEFAULT_INTEREST_MARKER};
use crate::cycle_collapse::{collapse_cycles, CollapseReport};
use crate::graph_sink::{GraphSink, SinkError};
use crate::node_pruner::{prune_nodes, PruneOptions, PruneReport};
use crate::record_parser::{ParseError, Record, RecordParser};
use crate::self_coverage::{fix_self_coverage, CorrectionReport};
use serde::Serialize;
use std::io::BufRead;
use thiserror::Error;
use tracing::{debug, info};

/// Label of the snapshot taken right after parsing
pub const DEBUG_SNAPSHOT: &str = "debug";
/// Label of the snapshot taken after pruning
pub const FINAL_SNAPSHOT: &str = "final";

/// Errors that abort call graph creation
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Line {line}: {source}")]
    Graph {
        line: usize,
        #[source]
        source: GraphError,
    },

    #[error("Call graph simplification failed: {0}")]
    Simplify(#[from] GraphError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Failed to read profiler output: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters collected while parsing
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseStats {
    pub lines: usize,
    pub nodes_with_inclusive: usize,
    pub nodes_self_only: usize,
    pub edges: usize,
    pub legends: usize,
    pub ignored: usize,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub parse: ParseStats,
    pub total_samples: u64,
    pub parsed_nodes: usize,
    pub parsed_edges: usize,
    pub parsed_self_coverage: f64,
    pub collapse: CollapseReport,
    pub correction: CorrectionReport,
    pub prune: PruneReport,
    pub final_nodes: usize,
    pub final_edges: usize,
    pub final_self_coverage: f64,
}

/// Parser, builder and simplification stages wired together
#[derive(Debug, Clone)]
pub struct GraphPipeline {
    parser: RecordParser,
    interest_marker: String,
    prune: PruneOptions,
}

impl GraphPipeline {
    /// Pipeline with default patterns, marker and prune options
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self::with_parser(RecordParser::new()?))
    }

    pub fn with_parser(parser: RecordParser) -> Self {
        Self {
            parser,
            interest_marker: DEFAULT_INTEREST_MARKER.to_string(),
            prune: PruneOptions::default(),
        }
    }

    pub fn interest_marker(mut self, marker: impl Into<String>) -> Self {
        self.interest_marker = marker.into();
        self
    }

    pub fn prune_options(mut self, options: PruneOptions) -> Self {
        self.prune = options;
        self
    }

    /// Parse renderer output into a graph
    pub fn build_graph<R: BufRead>(
        &self,
        mut reader: R,
        stats: &mut ParseStats,
    ) -> Result<CallGraph, PipelineError> {
        let mut graph = CallGraph::with_interest_marker(self.interest_marker.clone());
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            stats.lines += 1;
            let line_no = stats.lines;
            let line = trim_line_end(&buf);

            match self.parser.parse_line(line_no, line)? {
                Record::Node(node) => {
                    if node.has_inclusive {
                        stats.nodes_with_inclusive += 1;
                    } else {
                        stats.nodes_self_only += 1;
                    }
                    graph
                        .add_node(&node.id, &node.name, node.self_pct, node.coverage_pct)
                        .map_err(|source| PipelineError::Graph {
                            line: line_no,
                            source,
                        })?;
                }
                Record::Edge(edge) => {
                    stats.edges += 1;
                    graph
                        .add_edge(&edge.from, &edge.to, edge.weight)
                        .map_err(|source| PipelineError::Graph {
                            line: line_no,
                            source,
                        })?;
                }
                Record::Legend { total_samples } => {
                    stats.legends += 1;
                    graph.add_total_samples(total_samples);
                }
                Record::Ignore => stats.ignored += 1,
            }
        }

        debug!(
            lines = stats.lines,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            samples = graph.total_samples(),
            "parsed profiler output"
        );
        Ok(graph)
    }

    /// Collapse cycles, correct self coverage and prune, in that order
    pub fn simplify(
        &self,
        graph: &mut CallGraph,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        report.collapse = collapse_cycles(graph)?;
        if let Some(cycle) = graph.find_cycle() {
            let member = graph
                .node(cycle[0])
                .map_or_else(String::new, |n| n.profiler_id.clone());
            return Err(GraphError::Cyclic(member).into());
        }
        report.correction = fix_self_coverage(graph)?;
        report.prune = prune_nodes(graph, &self.prune)?;
        Ok(())
    }

    /// Run every stage, emitting the debug and final snapshots to `sink`
    pub fn run<R: BufRead>(
        &self,
        reader: R,
        sink: &mut dyn GraphSink,
    ) -> Result<(CallGraph, PipelineReport), PipelineError> {
        info!("Start call graph creation");
        let mut report = PipelineReport::default();

        let mut graph = self.build_graph(reader, &mut report.parse)?;
        report.total_samples = graph.total_samples();
        report.parsed_nodes = graph.node_count();
        report.parsed_edges = graph.edge_count();
        report.parsed_self_coverage = graph.total_self_coverage();
        sink.emit(DEBUG_SNAPSHOT, &graph)?;

        self.simplify(&mut graph, &mut report)?;

        report.final_nodes = graph.node_count();
        report.final_edges = graph.edge_count();
        report.final_self_coverage = graph.total_self_coverage();
        sink.emit(FINAL_SNAPSHOT, &graph)?;

        info!(
            nodes = report.final_nodes,
            edges = report.final_edges,
            cycles = report.collapse.cycles_collapsed(),
            pruned = report.prune.removed.len(),
            "Call graph creation successful"
        );
        Ok((graph, report))
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_sink::MemorySink;
    use std::io::Cursor;

    const DOT: &str = r#"digraph "app; 100 samples" {
node [width=0.375,height=0.25];
Legend [shape=box,fontsize=24,shape=plaintext,label="app\lTotal samples: 100\lFocusing on: 100\l"];
N1 [label="main\n0 (0.0%)\rof 100 (100.0%)\r" id="node1" fontsize=8.0 shape=box];
N2 [label="__cere__solve_12\n10 (10.0%)\rof 90 (90.0%)\r" id="node2" fontsize=8.0 shape=box];
N3 [label="memcpy\n30 (30.0%)\rof 60 (60.0%)\r" id="node3" fontsize=8.0 shape=box];
N4 [label="__cere__kernel_7\n60 (60.0%)\r" id="node4" fontsize=8.0 shape=box];
N1 -> N2 [label=90, weight=100, style="setlinewidth(2.0)"];
N2 -> N3 [label=80, weight=100, style="setlinewidth(2.0)"];
N3 -> N2 [label=20, weight=100, style="setlinewidth(2.0)"];
N3 -> N4 [label=60, weight=100, style="setlinewidth(2.0)"];
}
"#;

    #[test]
    fn test_build_graph_counts_records() {
        let pipeline = GraphPipeline::new().unwrap();
        let mut stats = ParseStats::default();
        let graph = pipeline
            .build_graph(Cursor::new(DOT.as_bytes()), &mut stats)
            .unwrap();

        assert_eq!(stats.nodes_with_inclusive, 3);
        assert_eq!(stats.nodes_self_only, 1);
        assert_eq!(stats.edges, 4);
        assert_eq!(stats.legends, 1);
        assert_eq!(stats.ignored, 3);
        assert_eq!(graph.total_samples(), 100);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_run_emits_both_snapshots() {
        let pipeline = GraphPipeline::new().unwrap();
        let mut sink = MemorySink::new();
        let (graph, report) = pipeline.run(Cursor::new(DOT.as_bytes()), &mut sink).unwrap();

        let debug = sink.get(DEBUG_SNAPSHOT).unwrap();
        assert_eq!(debug.nodes.len(), 4);
        let last = sink.get(FINAL_SNAPSHOT).unwrap();
        assert_eq!(last.nodes.len(), graph.node_count());

        assert!(graph.is_acyclic());
        assert_eq!(report.collapse.cycles_collapsed(), 1);
        assert_eq!(report.collapse.cycles[0].survivor, "N2");
        assert_eq!(report.prune.retained_roots, vec!["N1".to_string()]);
        assert_eq!(report.final_nodes, 3);
    }

    #[test]
    fn test_run_final_graph_values() {
        let pipeline = GraphPipeline::new().unwrap();
        let mut sink = MemorySink::new();
        let (graph, _) = pipeline.run(Cursor::new(DOT.as_bytes()), &mut sink).unwrap();

        // N2 and N3 collapse into N2 (coverage 90 > 60): N1 -> N2 (90), N2 -> N4 (60)
        let n1 = graph.node_by_profiler_id("N1").unwrap();
        let n2 = graph.node_by_profiler_id("N2").unwrap();
        let n4 = graph.node_by_profiler_id("N4").unwrap();
        assert_eq!(graph.edge_weight(n1, n2), Some(90.0));
        assert_eq!(graph.edge_weight(n2, n4), Some(60.0));
        assert_eq!(graph.node(n2).unwrap().coverage, 90.0);
        assert_eq!(graph.node(n2).unwrap().self_coverage, 30.0);
        assert_eq!(graph.node(n4).unwrap().self_coverage, 60.0);
    }

    #[test]
    fn test_edge_before_node_is_fatal() {
        let input = "N1 -> N2 [label=3, weight=1];\n";
        let pipeline = GraphPipeline::new().unwrap();
        let err = pipeline
            .run(Cursor::new(input.as_bytes()), &mut MemorySink::new())
            .unwrap_err();
        match err {
            PipelineError::Graph { line, source } => {
                assert_eq!(line, 1);
                assert!(matches!(source, GraphError::UnknownNode { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_number_is_fatal() {
        let input = "N1 [label=\"main\\n12 (x%)\\r\"];\n";
        let pipeline = GraphPipeline::new().unwrap();
        let err = pipeline
            .run(Cursor::new(input.as_bytes()), &mut MemorySink::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn test_crlf_lines() {
        let input = DOT.replace('\n', "\r\n");
        let pipeline = GraphPipeline::new().unwrap();
        let mut stats = ParseStats::default();
        let graph = pipeline
            .build_graph(Cursor::new(input.into_bytes()), &mut stats)
            .unwrap();
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_end(b"abc"), b"abc");
        assert_eq!(trim_line_end(b"\n"), b"");
    }
}
