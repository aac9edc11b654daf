//! codelet-callgraph - weighted call graphs from sampled-profiler output
//!
//! This library turns the dot text printed by a sampling profiler's renderer
//! into a cleaned call graph for coverage analysis and codelet selection:
//! records are parsed into a weighted graph, recursive cycles are collapsed,
//! exclusive coverage is recomputed, and frames that are not instrumented
//! regions are pruned while their samples are handed to their neighbors.

pub mod call_graph;
pub mod cli;
pub mod config;
pub mod cycle_collapse;
pub mod graph_sink;
pub mod node_pruner;
pub mod pipeline;
pub mod profile_runner;
pub mod record_parser;
pub mod self_coverage;
